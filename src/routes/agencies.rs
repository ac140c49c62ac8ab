use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_user, require_user_id},
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, AgencyMemberPath,
        AgencyMembersQuery, AgencyPath, CreateAgencyInput, CreateAgencyMemberInput,
        UpdateAgencyInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{assert_agency_member, assert_agency_role, ensure_agency_membership, list_user_agencies},
};

const MEMBER_ROLES: &[&str] = &["agency_admin", "owner", "tenant"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/agencies",
            axum::routing::get(list_agencies).post(create_agency),
        )
        .route(
            "/agencies/{agency_id}",
            axum::routing::get(get_agency).patch(update_agency),
        )
        .route(
            "/agencies/{agency_id}/members",
            axum::routing::get(list_members).post(add_member),
        )
        .route(
            "/agencies/{agency_id}/members/{member_user_id}",
            axum::routing::delete(remove_member),
        )
}

async fn list_agencies(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let agencies = list_user_agencies(&state, &user_id).await?;
    Ok(Json(json!({ "data": agencies })))
}

async fn create_agency(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateAgencyInput>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let created = create_row(pool, "agencies", &serialize_to_map(&payload)).await?;
    let agency_id = value_str(&created, "id");
    if agency_id.is_empty() {
        return Err(AppError::Internal(
            "Agency was created without an id.".to_string(),
        ));
    }

    ensure_agency_membership(&state, &agency_id, &user.id, "agency_admin").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user.id),
        "create",
        "agencies",
        Some(&agency_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_agency(
    State(state): State<AppState>,
    Path(path): Path<AgencyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_member(&state, &user_id, &path.agency_id).await?;
    let pool = db_pool(&state)?;

    let agency = get_row(pool, "agencies", &path.agency_id).await?;
    Ok(Json(agency))
}

async fn update_agency(
    State(state): State<AppState>,
    Path(path): Path<AgencyPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateAgencyInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &path.agency_id, &["agency_admin"]).await?;
    let pool = db_pool(&state)?;

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let before = get_row(pool, "agencies", &path.agency_id).await?;
    let updated = update_row(pool, "agencies", &path.agency_id, &patch).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&path.agency_id),
        Some(&user_id),
        "update",
        "agencies",
        Some(&path.agency_id),
        Some(before),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn list_members(
    State(state): State<AppState>,
    Path(path): Path<AgencyPath>,
    Query(query): Query<AgencyMembersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_member(&state, &user_id, &path.agency_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "agency_id".to_string(),
        Value::String(path.agency_id.clone()),
    );

    let rows = list_rows(
        pool,
        "agency_members",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn add_member(
    State(state): State<AppState>,
    Path(path): Path<AgencyPath>,
    headers: HeaderMap,
    Json(payload): Json<CreateAgencyMemberInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &path.agency_id, &["agency_admin"]).await?;

    let role = payload.role.trim();
    if !MEMBER_ROLES.contains(&role) {
        return Err(AppError::BadRequest(format!(
            "Unknown member role '{role}'."
        )));
    }

    ensure_agency_membership(&state, &path.agency_id, &payload.user_id, role).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&path.agency_id),
        Some(&user_id),
        "add_member",
        "agency_members",
        Some(&payload.user_id),
        None,
        Some(json!({ "user_id": payload.user_id, "role": role })),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "user_id": payload.user_id, "role": role })),
    ))
}

async fn remove_member(
    State(state): State<AppState>,
    Path(path): Path<AgencyMemberPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &path.agency_id, &["agency_admin"]).await?;
    let pool = db_pool(&state)?;

    if path.member_user_id == user_id {
        return Err(AppError::BadRequest(
            "An admin cannot remove their own membership.".to_string(),
        ));
    }

    sqlx::query("DELETE FROM agency_members WHERE agency_id = $1::uuid AND user_id = $2::uuid")
        .bind(&path.agency_id)
        .bind(&path.member_user_id)
        .execute(pool)
        .await
        .map_err(|error| AppError::Dependency(format!("Database request failed: {error}")))?;

    state
        .membership_cache
        .invalidate(&(path.member_user_id.clone(), path.agency_id.clone()))
        .await;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&path.agency_id),
        Some(&user_id),
        "remove_member",
        "agency_members",
        Some(&path.member_user_id),
        None,
        None,
    )
    .await;

    Ok(Json(json!({ "removed": path.member_user_id })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateOwnerInput,
        OwnerPath, OwnersQuery, UpdateOwnerInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{assert_agency_member, assert_agency_role},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/owners", axum::routing::get(list_owners).post(create_owner))
        .route(
            "/owners/{owner_id}",
            axum::routing::get(get_owner)
                .patch(update_owner)
                .delete(delete_owner),
        )
}

async fn list_owners(
    State(state): State<AppState>,
    Query(query): Query<OwnersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_member(&state, &user_id, &query.agency_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "agency_id".to_string(),
        Value::String(query.agency_id.clone()),
    );

    let rows = list_rows(
        pool,
        "owners",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_owner(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateOwnerInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &payload.agency_id, &["agency_admin"]).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let created = create_row(pool, "owners", &remove_nulls(serialize_to_map(&payload))).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.agency_id),
        Some(&user_id),
        "create",
        "owners",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "owners", &path.owner_id).await?;
    assert_agency_member(&state, &user_id, &value_str(&record, "agency_id")).await?;
    Ok(Json(record))
}

async fn update_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateOwnerInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "owners", &path.owner_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "owners", &path.owner_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "update",
        "owners",
        Some(&path.owner_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "owners", &path.owner_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    let deleted = delete_row(pool, "owners", &path.owner_id).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "delete",
        "owners",
        Some(&path.owner_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
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

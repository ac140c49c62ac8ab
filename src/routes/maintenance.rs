use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_auth, require_user_id, AgencyRole},
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input,
        CreateMaintenanceRequestInput, MaintenanceQuery, MaintenanceRequestPath,
        UpdateMaintenanceRequestInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{assert_agency_member, assert_agency_role},
};

const REQUEST_STATUSES: &[&str] = &["open", "in_progress", "resolved", "cancelled"];
const REQUEST_PRIORITIES: &[&str] = &["low", "normal", "high", "urgent"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/maintenance-requests",
            axum::routing::get(list_requests).post(create_request),
        )
        .route(
            "/maintenance-requests/{request_id}",
            axum::routing::get(get_request)
                .patch(update_request)
                .delete(delete_request),
        )
}

async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<MaintenanceQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let ctx = require_auth(&state, &headers, &query.agency_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "agency_id".to_string(),
        Value::String(query.agency_id.clone()),
    );
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    // Tenants only see requests they reported themselves.
    if ctx.role == AgencyRole::Tenant {
        filters.insert(
            "reported_by_user_id".to_string(),
            Value::String(ctx.user_id.clone()),
        );
    }

    let rows = list_rows(
        pool,
        "maintenance_requests",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMaintenanceRequestInput>,
) -> AppResult<impl IntoResponse> {
    // Any member may report an issue, tenants included.
    let ctx = require_auth(&state, &headers, &payload.agency_id).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    if !REQUEST_STATUSES.contains(&payload.status.trim()) {
        return Err(AppError::BadRequest(format!(
            "Unknown request status '{}'.",
            payload.status
        )));
    }
    if !REQUEST_PRIORITIES.contains(&payload.priority.trim()) {
        return Err(AppError::BadRequest(format!(
            "Unknown priority '{}'.",
            payload.priority
        )));
    }

    let property = get_row(pool, "properties", &payload.property_id).await?;
    if value_str(&property, "agency_id") != payload.agency_id {
        return Err(AppError::BadRequest(
            "Property belongs to a different agency.".to_string(),
        ));
    }

    let mut row = remove_nulls(serialize_to_map(&payload));
    row.insert(
        "reported_by_user_id".to_string(),
        Value::String(ctx.user_id.clone()),
    );

    let created = create_row(pool, "maintenance_requests", &row).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.agency_id),
        Some(&ctx.user_id),
        "create",
        "maintenance_requests",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_request(
    State(state): State<AppState>,
    Path(path): Path<MaintenanceRequestPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "maintenance_requests", &path.request_id).await?;
    assert_agency_member(&state, &user_id, &value_str(&record, "agency_id")).await?;
    Ok(Json(record))
}

async fn update_request(
    State(state): State<AppState>,
    Path(path): Path<MaintenanceRequestPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateMaintenanceRequestInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "maintenance_requests", &path.request_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    if let Some(status) = payload.status.as_deref() {
        if !REQUEST_STATUSES.contains(&status.trim()) {
            return Err(AppError::BadRequest(format!(
                "Unknown request status '{status}'."
            )));
        }
    }
    if let Some(priority) = payload.priority.as_deref() {
        if !REQUEST_PRIORITIES.contains(&priority.trim()) {
            return Err(AppError::BadRequest(format!(
                "Unknown priority '{priority}'."
            )));
        }
    }

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    if patch.get("status").and_then(Value::as_str) == Some("resolved") {
        patch.insert(
            "resolved_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }

    let updated = update_row(pool, "maintenance_requests", &path.request_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "update",
        "maintenance_requests",
        Some(&path.request_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_request(
    State(state): State<AppState>,
    Path(path): Path<MaintenanceRequestPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "maintenance_requests", &path.request_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    let deleted = delete_row(pool, "maintenance_requests", &path.request_id).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "delete",
        "maintenance_requests",
        Some(&path.request_id),
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

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_auth, require_user_id, AgencyRole},
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, CreateLeaseInput, LeasePath,
        LeasesQuery, UpdateLeaseInput,
    },
    services::{audit::write_audit_log, lease_expiry::fetch_leases_for_context},
    state::AppState,
    tenancy::assert_agency_role,
};

const LEASE_STATUSES: &[&str] = &["draft", "active", "terminated"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/leases", axum::routing::get(list_leases).post(create_lease))
        .route(
            "/leases/{lease_id}",
            axum::routing::get(get_lease).patch(update_lease),
        )
        .route(
            "/leases/{lease_id}/terminate",
            axum::routing::post(terminate_lease),
        )
}

async fn list_leases(
    State(state): State<AppState>,
    Query(query): Query<LeasesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let ctx = require_auth(&state, &headers, &query.agency_id).await?;
    let pool = db_pool(&state)?;

    let mut rows = match ctx.role {
        AgencyRole::AgencyAdmin => {
            let mut filters = Map::new();
            filters.insert(
                "agency_id".to_string(),
                Value::String(query.agency_id.clone()),
            );
            if let Some(status) = non_empty_opt(query.status.as_deref()) {
                filters.insert("status".to_string(), Value::String(status));
            }
            list_rows(
                pool,
                "leases",
                Some(&filters),
                clamp_limit_in_range(query.limit, 1, 5000),
                0,
                "created_at",
                false,
            )
            .await?
        }
        // Owners and tenants only ever see their own leases.
        AgencyRole::Owner | AgencyRole::Tenant => {
            let mut rows = fetch_leases_for_context(pool, &ctx).await?;
            if let Some(status) = non_empty_opt(query.status.as_deref()) {
                rows.retain(|row| value_str(row, "status") == status);
            }
            rows
        }
    };

    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        rows.retain(|row| value_str(row, "property_id") == property_id);
    }
    if let Some(tenant_id) = non_empty_opt(query.tenant_id.as_deref()) {
        rows.retain(|row| value_str(row, "tenant_id") == tenant_id);
    }

    Ok(Json(json!({ "data": rows })))
}

async fn create_lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateLeaseInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &payload.agency_id, &["agency_admin"]).await?;
    let pool = db_pool(&state)?;

    let start = parse_date(&payload.start_date)?;
    let end = parse_date(&payload.end_date)?;
    if end <= start {
        return Err(AppError::BadRequest(
            "Lease end_date must be after start_date.".to_string(),
        ));
    }
    if !LEASE_STATUSES.contains(&payload.status.trim()) {
        return Err(AppError::BadRequest(format!(
            "Unknown lease status '{}'.",
            payload.status
        )));
    }
    if payload.monthly_rent < 0.0 || !payload.monthly_rent.is_finite() {
        return Err(AppError::BadRequest(
            "Monthly rent must be a non-negative number.".to_string(),
        ));
    }

    // The property must belong to the same agency.
    let property = get_row(pool, "properties", &payload.property_id).await?;
    if value_str(&property, "agency_id") != payload.agency_id {
        return Err(AppError::BadRequest(
            "Property belongs to a different agency.".to_string(),
        ));
    }

    let created = create_row(pool, "leases", &remove_nulls(serialize_to_map(&payload))).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.agency_id),
        Some(&user_id),
        "create",
        "leases",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let record = get_row(pool, "leases", &path.lease_id).await?;
    let agency_id = value_str(&record, "agency_id");
    let ctx = require_auth(&state, &headers, &agency_id).await?;

    // Non-admins may only read leases that fall inside their own scope.
    if ctx.role != AgencyRole::AgencyAdmin {
        let visible = fetch_leases_for_context(pool, &ctx).await?;
        if !visible
            .iter()
            .any(|row| value_str(row, "id") == path.lease_id)
        {
            return Err(AppError::Forbidden(
                "Forbidden: lease is outside your scope.".to_string(),
            ));
        }
    }

    Ok(Json(record))
}

async fn update_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateLeaseInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "leases", &path.lease_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    if let Some(status) = payload.status.as_deref() {
        if !LEASE_STATUSES.contains(&status.trim()) {
            return Err(AppError::BadRequest(format!(
                "Unknown lease status '{status}'."
            )));
        }
    }
    if let Some(end_date) = payload.end_date.as_deref() {
        parse_date(end_date)?;
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "leases", &path.lease_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "update",
        "leases",
        Some(&path.lease_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

/// Terminating a lease is its own action: the next calendar sync removes the
/// matching lease-expiry event.
async fn terminate_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "leases", &path.lease_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    if value_str(&record, "status") == "terminated" {
        return Err(AppError::BadRequest(
            "Lease is already terminated.".to_string(),
        ));
    }

    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String("terminated".to_string()),
    );
    patch.insert(
        "terminated_at".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );

    let updated = update_row(pool, "leases", &path.lease_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "terminate",
        "leases",
        Some(&path.lease_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date. Expected YYYY-MM-DD.".to_string()))
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

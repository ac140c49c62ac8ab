use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_auth,
    error::{AppError, AppResult},
    repository::table_service::{delete_row, get_row, list_rows},
    schemas::{
        clamp_limit_in_range, CalendarEventPath, CalendarEventsQuery, LeaseExpirySyncInput,
    },
    services::lease_expiry::{run_lease_expiry_sync, ReminderRules},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/calendar/events", axum::routing::get(list_events))
        .route(
            "/calendar/events/{event_id}",
            axum::routing::delete(delete_event),
        )
        .route(
            "/calendar/lease-expiry-sync",
            axum::routing::post(sync_lease_expiries),
        )
}

/// A user's calendar is personal: listing is always scoped to the caller.
async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<CalendarEventsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let ctx = require_auth(&state, &headers, &query.agency_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("user_id".to_string(), Value::String(ctx.user_id.clone()));
    filters.insert(
        "agency_id".to_string(),
        Value::String(query.agency_id.clone()),
    );
    if let Some(event_type) = query
        .event_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        filters.insert(
            "event_type".to_string(),
            Value::String(event_type.to_string()),
        );
    }

    let rows = list_rows(
        pool,
        "calendar_events",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 5000),
        0,
        "starts_at",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn delete_event(
    State(state): State<AppState>,
    Path(path): Path<CalendarEventPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let record = get_row(pool, "calendar_events", &path.event_id).await?;
    let agency_id = value_str(&record, "agency_id");
    let ctx = require_auth(&state, &headers, &agency_id).await?;
    if value_str(&record, "user_id") != ctx.user_id {
        return Err(AppError::Forbidden(
            "Forbidden: the event belongs to another user.".to_string(),
        ));
    }

    let deleted = delete_row(pool, "calendar_events", &path.event_id).await?;
    Ok(Json(deleted))
}

/// Reconcile the caller's lease-expiry events against their current leases.
/// Reminder rules come from configuration and can be overridden per call.
async fn sync_lease_expiries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LeaseExpirySyncInput>,
) -> AppResult<Json<Value>> {
    let ctx = require_auth(&state, &headers, &payload.agency_id).await?;
    let pool = db_pool(&state)?;

    let config = &state.config;
    let rules = ReminderRules::new(
        payload.alert_days.unwrap_or(config.lease_alert_days),
        payload
            .alert_time
            .as_deref()
            .unwrap_or(&config.lease_alert_time),
        &config.agency_timezone,
    );

    let summary = run_lease_expiry_sync(pool, &ctx, &rules).await?;
    Ok(Json(summary))
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

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::list_rows,
    schemas::{clamp_limit_in_range, validate_input, EmailLogsQuery, SendEmailInput},
    services::email::send_email,
    state::AppState,
    tenancy::{assert_agency_member, assert_agency_role},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/notifications/email",
            axum::routing::post(send_notification_email),
        )
        .route(
            "/notifications/email-logs",
            axum::routing::get(list_email_logs),
        )
}

async fn send_notification_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendEmailInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &payload.agency_id, &["agency_admin"]).await?;
    validate_input(&payload)?;

    let result = send_email(
        &state,
        &payload.agency_id,
        &user_id,
        &payload.to,
        &payload.subject,
        payload.body_html.as_deref(),
        payload.body_text.as_deref(),
    )
    .await?;

    Ok((axum::http::StatusCode::ACCEPTED, Json(result)))
}

async fn list_email_logs(
    State(state): State<AppState>,
    Query(query): Query<EmailLogsQuery>,
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
        "email_logs",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

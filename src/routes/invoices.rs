use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, CreateInvoiceInput, InvoicePath,
        InvoicesQuery, UpdateInvoiceInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{assert_agency_member, assert_agency_role},
};

const INVOICE_STATUSES: &[&str] = &["open", "paid", "overdue", "cancelled"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/invoices",
            axum::routing::get(list_invoices).post(create_invoice),
        )
        .route(
            "/invoices/{invoice_id}",
            axum::routing::get(get_invoice)
                .patch(update_invoice)
                .delete(delete_invoice),
        )
}

async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoicesQuery>,
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
    if let Some(lease_id) = non_empty_opt(query.lease_id.as_deref()) {
        filters.insert("lease_id".to_string(), Value::String(lease_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(from) = non_empty_opt(query.from_date.as_deref()) {
        parse_date(&from)?;
        filters.insert("due_date__gte".to_string(), Value::String(from));
    }
    if let Some(to) = non_empty_opt(query.to_date.as_deref()) {
        parse_date(&to)?;
        filters.insert("due_date__lte".to_string(), Value::String(to));
    }

    let rows = list_rows(
        pool,
        "invoices",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "due_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateInvoiceInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &payload.agency_id, &["agency_admin"]).await?;
    let pool = db_pool(&state)?;

    parse_date(&payload.due_date)?;
    if payload.amount <= 0.0 || !payload.amount.is_finite() {
        return Err(AppError::BadRequest(
            "Invoice amount must be positive.".to_string(),
        ));
    }
    validate_currency(&payload.currency)?;
    if !INVOICE_STATUSES.contains(&payload.status.trim()) {
        return Err(AppError::BadRequest(format!(
            "Unknown invoice status '{}'.",
            payload.status
        )));
    }

    let lease = get_row(pool, "leases", &payload.lease_id).await?;
    if value_str(&lease, "agency_id") != payload.agency_id {
        return Err(AppError::BadRequest(
            "Lease belongs to a different agency.".to_string(),
        ));
    }

    let mut row = remove_nulls(serialize_to_map(&payload));
    row.insert(
        "currency".to_string(),
        Value::String(payload.currency.trim().to_ascii_uppercase()),
    );

    let created = create_row(pool, "invoices", &row).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.agency_id),
        Some(&user_id),
        "create",
        "invoices",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "invoices", &path.invoice_id).await?;
    assert_agency_member(&state, &user_id, &value_str(&record, "agency_id")).await?;
    Ok(Json(record))
}

async fn update_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateInvoiceInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "invoices", &path.invoice_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    if let Some(status) = payload.status.as_deref() {
        if !INVOICE_STATUSES.contains(&status.trim()) {
            return Err(AppError::BadRequest(format!(
                "Unknown invoice status '{status}'."
            )));
        }
    }
    if let Some(due_date) = payload.due_date.as_deref() {
        parse_date(due_date)?;
    }
    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(currency) = payload.currency.as_deref() {
        validate_currency(currency)?;
        patch.insert(
            "currency".to_string(),
            Value::String(currency.trim().to_ascii_uppercase()),
        );
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "invoices", &path.invoice_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "update",
        "invoices",
        Some(&path.invoice_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "invoices", &path.invoice_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    let deleted = delete_row(pool, "invoices", &path.invoice_id).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "delete",
        "invoices",
        Some(&path.invoice_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

fn validate_currency(currency: &str) -> AppResult<()> {
    let normalized = currency.trim().to_ascii_uppercase();
    if normalized == "USD" || normalized == "DOP" {
        return Ok(());
    }
    Err(AppError::BadRequest(format!(
        "Unsupported currency '{currency}'. Expected USD or DOP."
    )))
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

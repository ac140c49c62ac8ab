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
    repository::table_service::{count_rows, create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, CreatePaymentInput, PaymentPath,
        PaymentsQuery, UpdatePaymentInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{assert_agency_member, assert_agency_role},
};

const PAYMENT_METHODS: &[&str] = &["cash", "transfer"];
const PAYMENT_CURRENCIES: &[&str] = &["USD", "DOP"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/payments",
            axum::routing::get(list_payments).post(create_payment),
        )
        .route(
            "/payments/{payment_id}",
            axum::routing::get(get_payment)
                .patch(update_payment)
                .delete(delete_payment),
        )
}

async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
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
    if let Some(owner_id) = non_empty_opt(query.owner_id.as_deref()) {
        filters.insert("owner_id".to_string(), Value::String(owner_id));
    }
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(currency) = non_empty_opt(query.currency.as_deref()) {
        filters.insert(
            "currency".to_string(),
            Value::String(currency.to_ascii_uppercase()),
        );
    }
    if let Some(method) = non_empty_opt(query.method.as_deref()) {
        filters.insert(
            "method".to_string(),
            Value::String(method.to_ascii_lowercase()),
        );
    }
    if let Some(from) = non_empty_opt(query.from_date.as_deref()) {
        parse_date(&from)?;
        filters.insert("paid_on__gte".to_string(), Value::String(from));
    }
    if let Some(to) = non_empty_opt(query.to_date.as_deref()) {
        parse_date(&to)?;
        filters.insert("paid_on__lte".to_string(), Value::String(to));
    }

    let filters_for_total = filters.clone();
    let filters_for_rows = filters;
    let limit = clamp_limit_in_range(query.limit, 1, 5000);
    let (total, rows) = tokio::try_join!(
        async move { count_rows(pool, "payments", Some(&filters_for_total)).await },
        async move {
            list_rows(
                pool,
                "payments",
                Some(&filters_for_rows),
                limit,
                0,
                "paid_on",
                false,
            )
            .await
        }
    )?;
    Ok(Json(json!({ "data": rows, "total": total })))
}

async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &payload.agency_id, &["agency_admin"]).await?;
    let pool = db_pool(&state)?;

    parse_date(&payload.paid_on)?;
    if payload.amount <= 0.0 || !payload.amount.is_finite() {
        return Err(AppError::BadRequest(
            "Payment amount must be positive.".to_string(),
        ));
    }

    let currency = payload.currency.trim().to_ascii_uppercase();
    if !PAYMENT_CURRENCIES.contains(&currency.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unsupported currency '{}'. Expected USD or DOP.",
            payload.currency
        )));
    }
    let method = payload.method.trim().to_ascii_lowercase();
    if !PAYMENT_METHODS.contains(&method.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unsupported payment method '{}'. Expected cash or transfer.",
            payload.method
        )));
    }

    // Mark the linked invoice paid in the same request flow.
    let invoice = match payload.invoice_id.as_deref().map(str::trim) {
        Some(invoice_id) if !invoice_id.is_empty() => {
            let invoice = get_row(pool, "invoices", invoice_id).await?;
            if value_str(&invoice, "agency_id") != payload.agency_id {
                return Err(AppError::BadRequest(
                    "Invoice belongs to a different agency.".to_string(),
                ));
            }
            Some(invoice)
        }
        _ => None,
    };

    let mut row = remove_nulls(serialize_to_map(&payload));
    row.insert("currency".to_string(), Value::String(currency));
    row.insert("method".to_string(), Value::String(method));
    row.insert(
        "recorded_by_user_id".to_string(),
        Value::String(user_id.clone()),
    );

    let created = create_row(pool, "payments", &row).await?;

    if let Some(invoice) = invoice {
        let invoice_id = value_str(&invoice, "id");
        let mut patch = Map::new();
        patch.insert("status".to_string(), Value::String("paid".to_string()));
        patch.insert(
            "paid_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        update_row(pool, "invoices", &invoice_id, &patch).await?;
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.agency_id),
        Some(&user_id),
        "create",
        "payments",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "payments", &path.payment_id).await?;
    assert_agency_member(&state, &user_id, &value_str(&record, "agency_id")).await?;
    Ok(Json(record))
}

async fn update_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePaymentInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "payments", &path.payment_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    if let Some(paid_on) = payload.paid_on.as_deref() {
        parse_date(paid_on)?;
    }
    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(currency) = payload.currency.as_deref() {
        let normalized = currency.trim().to_ascii_uppercase();
        if !PAYMENT_CURRENCIES.contains(&normalized.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Unsupported currency '{currency}'. Expected USD or DOP."
            )));
        }
        patch.insert("currency".to_string(), Value::String(normalized));
    }
    if let Some(method) = payload.method.as_deref() {
        let normalized = method.trim().to_ascii_lowercase();
        if !PAYMENT_METHODS.contains(&normalized.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Unsupported payment method '{method}'. Expected cash or transfer."
            )));
        }
        patch.insert("method".to_string(), Value::String(normalized));
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "payments", &path.payment_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "update",
        "payments",
        Some(&path.payment_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "payments", &path.payment_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    let deleted = delete_row(pool, "payments", &path.payment_id).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "delete",
        "payments",
        Some(&path.payment_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
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

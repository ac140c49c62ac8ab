use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{
        create_row, delete_row, delete_rows, get_row, insert_rows, list_rows, update_row,
    },
    schemas::{
        clamp_limit_in_range, GenerateManagerReportInput, GenerateOwnerReportsInput,
        ManagerReportsQuery, OwnerReportsQuery, ReportPath, ReportPeriodQuery,
        UpdateManagerReportInput, UpdateOwnerReportInput,
    },
    services::{
        audit::write_audit_log,
        report_calc::{
            aggregate_payment_totals, aggregate_totals_by_owner, compute_fee_breakdown, round2,
            PaymentTotals,
        },
    },
    state::AppState,
    tenancy::{assert_agency_member, assert_agency_role},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/reports/manager",
            axum::routing::get(list_manager_reports)
                .post(generate_manager_report)
                .delete(delete_manager_reports_for_period),
        )
        .route(
            "/reports/manager/{report_id}",
            axum::routing::patch(update_manager_report).delete(delete_manager_report),
        )
        .route(
            "/reports/owner",
            axum::routing::get(list_owner_reports)
                .post(generate_owner_reports)
                .delete(delete_owner_reports_for_period),
        )
        .route(
            "/reports/owner/{report_id}",
            axum::routing::patch(update_owner_report).delete(delete_owner_report),
        )
}

// ---------------------------------------------------------------------------
// Manager reports
// ---------------------------------------------------------------------------

async fn list_manager_reports(
    State(state): State<AppState>,
    Query(query): Query<ManagerReportsQuery>,
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
    if let Some(month) = non_empty_opt(query.month.as_deref()) {
        filters.insert("month".to_string(), Value::String(month));
    }

    let rows = list_rows(
        pool,
        "manager_reports",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "start_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

/// Generate and save one manager report for a period. The period totals come
/// from the agency's payment records; the fee fields from the calculator.
async fn generate_manager_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateManagerReportInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &payload.agency_id, &["agency_admin"]).await?;
    let pool = db_pool(&state)?;

    let (start, end) = parse_period(&payload.start_date, &payload.end_date)?;

    // The store itself enforces no uniqueness; the generate action is the
    // layer that refuses a duplicate period.
    let existing = list_rows(
        pool,
        "manager_reports",
        Some(&period_filters(
            &payload.agency_id,
            &payload.month,
            &payload.start_date,
            &payload.end_date,
        )),
        1,
        0,
        "created_at",
        true,
    )
    .await?;
    if !existing.is_empty() {
        return Err(AppError::Conflict(
            "A manager report for this period already exists.".to_string(),
        ));
    }

    let payments = fetch_period_payments(pool, &payload.agency_id, start, end).await?;
    let totals = aggregate_payment_totals(&payments);
    let fee_percent = payload
        .fee_percent
        .unwrap_or(state.config.manager_fee_percent);
    let breakdown = compute_fee_breakdown(&totals, payload.avg_rate, fee_percent)?;

    let mut row = Map::new();
    row.insert(
        "agency_id".to_string(),
        Value::String(payload.agency_id.clone()),
    );
    row.insert("month".to_string(), Value::String(payload.month.clone()));
    row.insert(
        "start_date".to_string(),
        Value::String(payload.start_date.clone()),
    );
    row.insert(
        "end_date".to_string(),
        Value::String(payload.end_date.clone()),
    );
    insert_totals(&mut row, &totals);
    if let Some(rate) = payload.avg_rate {
        row.insert("avg_rate".to_string(), json_number(rate));
    }
    row.insert("fee_percent".to_string(), json_number(fee_percent));
    row.insert(
        "fee_base_dop".to_string(),
        json_number(round2(breakdown.fee_base_dop)),
    );
    row.insert("fee_dop".to_string(), json_number(round2(breakdown.fee_dop)));
    row.insert(
        "fee_deducted_dop".to_string(),
        json_number(round2(breakdown.fee_deducted_dop)),
    );
    row.insert(
        "owners_leftover_dop".to_string(),
        json_number(round2(breakdown.owners_leftover_dop)),
    );
    row.insert(
        "created_by_user_id".to_string(),
        Value::String(user_id.clone()),
    );

    let created = create_row(pool, "manager_reports", &row).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.agency_id),
        Some(&user_id),
        "generate",
        "manager_reports",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

/// Re-apply the calculator after a rate or fee-percent edit. The stored raw
/// totals stay as generated; only the derived fields and the edit inputs
/// change, plus a fresh update timestamp.
async fn update_manager_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateManagerReportInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "manager_reports", &path.report_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    let totals = totals_from_report_row(&record);
    let avg_rate = payload.avg_rate.or_else(|| number_opt(record.get("avg_rate")));
    let fee_percent = payload
        .fee_percent
        .or_else(|| number_opt(record.get("fee_percent")))
        .unwrap_or(state.config.manager_fee_percent);
    let breakdown = compute_fee_breakdown(&totals, avg_rate, fee_percent)?;

    let mut patch = Map::new();
    if let Some(rate) = avg_rate {
        patch.insert("avg_rate".to_string(), json_number(rate));
    }
    patch.insert("fee_percent".to_string(), json_number(fee_percent));
    patch.insert(
        "fee_base_dop".to_string(),
        json_number(round2(breakdown.fee_base_dop)),
    );
    patch.insert("fee_dop".to_string(), json_number(round2(breakdown.fee_dop)));
    patch.insert(
        "fee_deducted_dop".to_string(),
        json_number(round2(breakdown.fee_deducted_dop)),
    );
    patch.insert(
        "owners_leftover_dop".to_string(),
        json_number(round2(breakdown.owners_leftover_dop)),
    );
    patch.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let updated = update_row(pool, "manager_reports", &path.report_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "update",
        "manager_reports",
        Some(&path.report_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_manager_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    delete_single_report(&state, &headers, "manager_reports", &path.report_id).await
}

async fn delete_manager_reports_for_period(
    State(state): State<AppState>,
    Query(query): Query<ReportPeriodQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    delete_reports_for_period(&state, &headers, "manager_reports", &query).await
}

// ---------------------------------------------------------------------------
// Owner reports
// ---------------------------------------------------------------------------

async fn list_owner_reports(
    State(state): State<AppState>,
    Query(query): Query<OwnerReportsQuery>,
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
    if let Some(month) = non_empty_opt(query.month.as_deref()) {
        filters.insert("month".to_string(), Value::String(month));
    }

    let rows = list_rows(
        pool,
        "owner_reports",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "start_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

/// Generate one owner report row per owner that received payments in the
/// period (or just one owner when `owner_id` is set).
async fn generate_owner_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateOwnerReportsInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_role(&state, &user_id, &payload.agency_id, &["agency_admin"]).await?;
    let pool = db_pool(&state)?;

    let (start, end) = parse_period(&payload.start_date, &payload.end_date)?;

    let mut existing_filters = period_filters(
        &payload.agency_id,
        &payload.month,
        &payload.start_date,
        &payload.end_date,
    );
    if let Some(owner_id) = non_empty_opt(payload.owner_id.as_deref()) {
        existing_filters.insert("owner_id".to_string(), Value::String(owner_id));
    }
    let existing = list_rows(
        pool,
        "owner_reports",
        Some(&existing_filters),
        1,
        0,
        "created_at",
        true,
    )
    .await?;
    if !existing.is_empty() {
        return Err(AppError::Conflict(
            "Owner reports for this period already exist.".to_string(),
        ));
    }

    let payments = fetch_period_payments(pool, &payload.agency_id, start, end).await?;
    let mut by_owner = aggregate_totals_by_owner(&payments);
    if let Some(owner_id) = non_empty_opt(payload.owner_id.as_deref()) {
        by_owner.retain(|key, _| *key == owner_id);
    }
    if by_owner.is_empty() {
        return Err(AppError::NotFound(
            "No attributable payments found for this period.".to_string(),
        ));
    }

    let mut rows = Vec::with_capacity(by_owner.len());
    let mut owner_ids = by_owner.keys().cloned().collect::<Vec<_>>();
    owner_ids.sort_unstable();
    for owner_id in owner_ids {
        let totals = by_owner[&owner_id];
        let mut row = Map::new();
        row.insert(
            "agency_id".to_string(),
            Value::String(payload.agency_id.clone()),
        );
        row.insert("owner_id".to_string(), Value::String(owner_id));
        row.insert("month".to_string(), Value::String(payload.month.clone()));
        row.insert(
            "start_date".to_string(),
            Value::String(payload.start_date.clone()),
        );
        row.insert(
            "end_date".to_string(),
            Value::String(payload.end_date.clone()),
        );
        insert_totals(&mut row, &totals);
        row.insert(
            "avg_rate".to_string(),
            payload.avg_rate.map(json_number).unwrap_or(Value::Null),
        );
        row.insert(
            "created_by_user_id".to_string(),
            Value::String(user_id.clone()),
        );
        rows.push(row);
    }

    let created = insert_rows(pool, "owner_reports", &rows).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.agency_id),
        Some(&user_id),
        "generate",
        "owner_reports",
        None,
        None,
        Some(json!({ "month": payload.month, "rows": created.len() })),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "data": created })),
    ))
}

async fn update_owner_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateOwnerReportInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "owner_reports", &path.report_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    let Some(rate) = payload.avg_rate.filter(|rate| rate.is_finite() && *rate > 0.0) else {
        return Err(AppError::UnprocessableEntity(
            "Average rate must be a positive number.".to_string(),
        ));
    };

    let mut patch = Map::new();
    patch.insert("avg_rate".to_string(), json_number(rate));
    patch.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let updated = update_row(pool, "owner_reports", &path.report_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "update",
        "owner_reports",
        Some(&path.report_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_owner_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    delete_single_report(&state, &headers, "owner_reports", &path.report_id).await
}

async fn delete_owner_reports_for_period(
    State(state): State<AppState>,
    Query(query): Query<ReportPeriodQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    delete_reports_for_period(&state, &headers, "owner_reports", &query).await
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

async fn delete_single_report(
    state: &AppState,
    headers: &HeaderMap,
    table: &str,
    report_id: &str,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(state, headers).await?;
    let pool = db_pool(state)?;

    let record = get_row(pool, table, report_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(state, &user_id, &agency_id, &["agency_admin"]).await?;

    let deleted = delete_row(pool, table, report_id).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "delete",
        table,
        Some(report_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

/// Delete-for-period is an exact tuple match on agency + month + start_date
/// + end_date, not a range scan.
async fn delete_reports_for_period(
    state: &AppState,
    headers: &HeaderMap,
    table: &str,
    query: &ReportPeriodQuery,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(state, headers).await?;
    assert_agency_role(state, &user_id, &query.agency_id, &["agency_admin"]).await?;
    let pool = db_pool(state)?;

    parse_period(&query.start_date, &query.end_date)?;
    let deleted = delete_rows(
        pool,
        table,
        &period_filters(
            &query.agency_id,
            &query.month,
            &query.start_date,
            &query.end_date,
        ),
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&query.agency_id),
        Some(&user_id),
        "delete_period",
        table,
        None,
        None,
        Some(json!({ "month": query.month, "deleted": deleted })),
    )
    .await;

    Ok(Json(json!({ "deleted": deleted })))
}

async fn fetch_period_payments(
    pool: &sqlx::PgPool,
    agency_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<Vec<Value>> {
    list_rows(
        pool,
        "payments",
        Some(&{
            let mut filters = Map::new();
            filters.insert(
                "agency_id".to_string(),
                Value::String(agency_id.to_string()),
            );
            filters.insert(
                "paid_on__gte".to_string(),
                Value::String(start.to_string()),
            );
            filters.insert("paid_on__lte".to_string(), Value::String(end.to_string()));
            filters
        }),
        5000,
        0,
        "paid_on",
        true,
    )
    .await
}

fn period_filters(
    agency_id: &str,
    month: &str,
    start_date: &str,
    end_date: &str,
) -> Map<String, Value> {
    let mut filters = Map::new();
    filters.insert(
        "agency_id".to_string(),
        Value::String(agency_id.to_string()),
    );
    filters.insert("month".to_string(), Value::String(month.to_string()));
    filters.insert(
        "start_date".to_string(),
        Value::String(start_date.to_string()),
    );
    filters.insert("end_date".to_string(), Value::String(end_date.to_string()));
    filters
}

fn insert_totals(row: &mut Map<String, Value>, totals: &PaymentTotals) {
    row.insert(
        "usd_cash_total".to_string(),
        json_number(round2(totals.usd_cash_total)),
    );
    row.insert(
        "dop_cash_total".to_string(),
        json_number(round2(totals.dop_cash_total)),
    );
    row.insert(
        "usd_transfer_total".to_string(),
        json_number(round2(totals.usd_transfer_total)),
    );
    row.insert(
        "dop_transfer_total".to_string(),
        json_number(round2(totals.dop_transfer_total)),
    );
    row.insert(
        "usd_total".to_string(),
        json_number(round2(totals.usd_total())),
    );
    row.insert(
        "dop_total".to_string(),
        json_number(round2(totals.dop_total())),
    );
}

fn totals_from_report_row(row: &Value) -> PaymentTotals {
    PaymentTotals {
        usd_cash_total: number_from_value(row.get("usd_cash_total")),
        dop_cash_total: number_from_value(row.get("dop_cash_total")),
        usd_transfer_total: number_from_value(row.get("usd_transfer_total")),
        dop_transfer_total: number_from_value(row.get("dop_transfer_total")),
    }
}

fn parse_period(start_date: &str, end_date: &str) -> AppResult<(NaiveDate, NaiveDate)> {
    let start = parse_date(start_date)?;
    let end = parse_date(end_date)?;
    if end < start {
        return Err(AppError::BadRequest(
            "Invalid period: end_date must be on or after start_date.".to_string(),
        ));
    }
    Ok((start, end))
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date. Expected YYYY-MM-DD.".to_string()))
}

fn json_number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn number_from_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn number_opt(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
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

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{parse_period, period_filters, totals_from_report_row};

    #[test]
    fn builds_exact_period_tuple_filters() {
        let filters = period_filters("a-1", "2026-03", "2026-03-01", "2026-03-31");
        assert_eq!(filters.len(), 4);
        assert_eq!(filters.get("agency_id"), Some(&json!("a-1")));
        assert_eq!(filters.get("month"), Some(&json!("2026-03")));
        assert_eq!(filters.get("start_date"), Some(&json!("2026-03-01")));
        assert_eq!(filters.get("end_date"), Some(&json!("2026-03-31")));
        // No range suffixes: the match is the exact tuple.
        assert!(filters.keys().all(|key| !key.contains("__")));
    }

    #[test]
    fn rejects_inverted_periods() {
        assert!(parse_period("2026-03-01", "2026-03-31").is_ok());
        assert!(parse_period("2026-03-01", "2026-03-01").is_ok());
        assert!(parse_period("2026-03-31", "2026-03-01").is_err());
        assert!(parse_period("march", "2026-03-31").is_err());
    }

    #[test]
    fn reads_stored_totals_for_recompute() {
        let row: Value = json!({
            "usd_cash_total": 100.0,
            "dop_cash_total": "3000",
            "usd_transfer_total": 900,
            "dop_transfer_total": 2000.0,
        });
        let totals = totals_from_report_row(&row);
        assert_eq!(totals.usd_total(), 1000.0);
        assert_eq!(totals.dop_total(), 5000.0);
        assert_eq!(totals.dop_cash_total, 3000.0);
    }
}

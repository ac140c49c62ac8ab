use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Best-effort audit trail. A failed audit write is logged and swallowed so
/// it never fails the user-facing operation.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    agency_id: Option<&str>,
    user_id: Option<&str>,
    action: &str,
    table_name: &str,
    entity_id: Option<&str>,
    before: Option<Value>,
    after: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut row = Map::new();
    if let Some(agency_id) = agency_id.filter(|value| !value.trim().is_empty()) {
        row.insert(
            "agency_id".to_string(),
            Value::String(agency_id.to_string()),
        );
    }
    if let Some(user_id) = user_id.filter(|value| !value.trim().is_empty()) {
        row.insert("user_id".to_string(), Value::String(user_id.to_string()));
    }
    row.insert("action".to_string(), Value::String(action.to_string()));
    row.insert(
        "table_name".to_string(),
        Value::String(table_name.to_string()),
    );
    if let Some(entity_id) = entity_id.filter(|value| !value.trim().is_empty()) {
        row.insert(
            "entity_id".to_string(),
            Value::String(entity_id.to_string()),
        );
    }
    if let Some(before) = before {
        row.insert("before".to_string(), before);
    }
    if let Some(after) = after {
        row.insert("after".to_string(), after);
    }

    if let Err(error) = create_row(pool, "audit_logs", &row).await {
        tracing::warn!(error = %error, action, table_name, "Audit log write failed");
    }
}

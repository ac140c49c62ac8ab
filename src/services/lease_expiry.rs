use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::{
    auth::{AgencyRole, AuthContext},
    error::AppResult,
    repository::table_service::{delete_rows, insert_rows, list_rows, update_row},
};

pub const LEASE_EXPIRY_EVENT_TYPE: &str = "lease_expiry";
const LEASE_STATUS_TERMINATED: &str = "terminated";

/// Reminder configuration for expiry events. `alert_minutes_before` combines
/// a day offset with a time-of-day, each component clamped to its valid
/// range.
#[derive(Debug, Clone)]
pub struct ReminderRules {
    alert_days: i64,
    alert_hour: i64,
    alert_minute: i64,
    timezone: Tz,
}

impl ReminderRules {
    pub fn new(alert_days: i64, alert_time: &str, timezone: &str) -> Self {
        let (alert_hour, alert_minute) = parse_alert_time(alert_time);
        let timezone = timezone
            .trim()
            .parse::<Tz>()
            .unwrap_or(chrono_tz::America::Santo_Domingo);
        Self {
            alert_days: alert_days.max(0),
            alert_hour,
            alert_minute,
            timezone,
        }
    }

    pub fn alert_minutes_before(&self) -> i64 {
        self.alert_days * 24 * 60 + self.alert_hour * 60 + self.alert_minute
    }
}

fn parse_alert_time(raw: &str) -> (i64, i64) {
    let mut parts = raw.trim().splitn(2, ':');
    let hour = parts
        .next()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(9);
    let minute = parts
        .next()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0);
    (hour.clamp(0, 23), minute.clamp(0, 59))
}

/// The actions one reconciliation run will apply, in application order:
/// duplicate deletions first, then inserts, updates, stale deletions.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub duplicate_event_ids: Vec<String>,
    pub inserts: Vec<Map<String, Value>>,
    pub updates: Vec<(String, Map<String, Value>)>,
    pub stale_event_ids: Vec<String>,
}

/// Pure planning step: diff the caller's leases against their existing
/// expiry events. Events without a `lease_id` are orphans and always
/// deleted; for a `lease_id` with several events only the first (store
/// return order, oldest first) survives.
pub fn plan_lease_expiry_sync(
    ctx: &AuthContext,
    leases: &[Value],
    existing_events: &[Value],
    property_names: &HashMap<String, String>,
    rules: &ReminderRules,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    let mut event_by_lease: HashMap<String, String> = HashMap::new();
    for event in existing_events {
        let event_id = value_str(event, "id");
        if event_id.is_empty() {
            continue;
        }
        let lease_id = value_str(event, "lease_id");
        if lease_id.is_empty() || event_by_lease.contains_key(&lease_id) {
            plan.duplicate_event_ids.push(event_id);
            continue;
        }
        event_by_lease.insert(lease_id, event_id);
    }

    let alert_minutes_before = rules.alert_minutes_before();

    for lease in leases {
        let lease_id = value_str(lease, "id");
        if lease_id.is_empty() {
            continue;
        }

        let status = value_str(lease, "status").to_ascii_lowercase();
        if status == LEASE_STATUS_TERMINATED {
            if let Some(event_id) = event_by_lease.get(&lease_id) {
                plan.stale_event_ids.push(event_id.clone());
            }
            continue;
        }

        let Some(end_date) = parse_date(&value_str(lease, "end_date")) else {
            continue;
        };

        let (starts_at, ends_at) = all_day_span(end_date, rules.timezone);
        let property_id = value_str(lease, "property_id");
        let property_name = resolve_property_name(lease, &property_id, property_names);

        match event_by_lease.get(&lease_id) {
            None => {
                let mut row = Map::new();
                row.insert("user_id".to_string(), Value::String(ctx.user_id.clone()));
                row.insert(
                    "agency_id".to_string(),
                    Value::String(ctx.agency_id.clone()),
                );
                row.insert(
                    "event_type".to_string(),
                    Value::String(LEASE_EXPIRY_EVENT_TYPE.to_string()),
                );
                row.insert("lease_id".to_string(), Value::String(lease_id));
                row.insert("property_id".to_string(), Value::String(property_id));
                row.insert(
                    "title".to_string(),
                    Value::String(format!("Lease expiry: {property_name}")),
                );
                row.insert("starts_at".to_string(), Value::String(starts_at));
                row.insert("ends_at".to_string(), Value::String(ends_at));
                row.insert("all_day".to_string(), Value::Bool(true));
                row.insert(
                    "alert_minutes_before".to_string(),
                    Value::Number(alert_minutes_before.into()),
                );
                plan.inserts.push(row);
            }
            Some(event_id) => {
                // Refresh on existence; no field-level diffing.
                let mut patch = Map::new();
                patch.insert("property_id".to_string(), Value::String(property_id));
                patch.insert(
                    "title".to_string(),
                    Value::String(format!("Lease expiry: {property_name}")),
                );
                patch.insert("starts_at".to_string(), Value::String(starts_at));
                patch.insert("ends_at".to_string(), Value::String(ends_at));
                patch.insert("all_day".to_string(), Value::Bool(true));
                patch.insert(
                    "alert_minutes_before".to_string(),
                    Value::Number(alert_minutes_before.into()),
                );
                patch.insert(
                    "updated_at".to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                plan.updates.push((event_id.clone(), patch));
            }
        }
    }

    plan
}

/// Run one reconciliation for the calling user: fetch role-scoped leases and
/// existing events, plan, then apply inserts, updates, and deletions in that
/// order. The first persistence error aborts the remaining steps; a rerun
/// reconverges.
pub async fn run_lease_expiry_sync(
    pool: &PgPool,
    ctx: &AuthContext,
    rules: &ReminderRules,
) -> AppResult<Value> {
    let leases = fetch_leases_for_context(pool, ctx).await?;

    let existing_events = list_rows(
        pool,
        "calendar_events",
        Some(&json_map(&[
            ("user_id", Value::String(ctx.user_id.clone())),
            ("agency_id", Value::String(ctx.agency_id.clone())),
            (
                "event_type",
                Value::String(LEASE_EXPIRY_EVENT_TYPE.to_string()),
            ),
        ])),
        5000,
        0,
        "created_at",
        true,
    )
    .await?;

    let property_names = fetch_property_names(pool, ctx, &leases).await?;
    let plan = plan_lease_expiry_sync(ctx, &leases, &existing_events, &property_names, rules);

    let mut deduplicated = 0_u64;
    if !plan.duplicate_event_ids.is_empty() {
        deduplicated = delete_rows(
            pool,
            "calendar_events",
            &json_map(&[(
                "id",
                Value::Array(
                    plan.duplicate_event_ids
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            )]),
        )
        .await?;
    }

    let inserted = if plan.inserts.is_empty() {
        0
    } else {
        insert_rows(pool, "calendar_events", &plan.inserts).await?.len()
    };

    let mut updated = 0_u64;
    for (event_id, patch) in &plan.updates {
        update_row(pool, "calendar_events", event_id, patch).await?;
        updated += 1;
    }

    let mut deleted = 0_u64;
    if !plan.stale_event_ids.is_empty() {
        deleted = delete_rows(
            pool,
            "calendar_events",
            &json_map(&[(
                "id",
                Value::Array(
                    plan.stale_event_ids
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            )]),
        )
        .await?;
    }

    Ok(json!({
        "leases_seen": leases.len(),
        "events_deduplicated": deduplicated,
        "events_inserted": inserted,
        "events_updated": updated,
        "events_deleted": deleted,
        "alert_minutes_before": rules.alert_minutes_before(),
        "synced_at": Utc::now().to_rfc3339(),
    }))
}

/// The lease source, scoped by the caller's role: admins see the whole
/// agency, owners the leases of their properties, tenants their own leases.
/// Terminated leases are included so their events can be cleaned up.
pub async fn fetch_leases_for_context(
    pool: &PgPool,
    ctx: &AuthContext,
) -> AppResult<Vec<Value>> {
    let agency_filter = ("agency_id", Value::String(ctx.agency_id.clone()));

    match ctx.role {
        AgencyRole::AgencyAdmin => {
            list_rows(
                pool,
                "leases",
                Some(&json_map(&[agency_filter])),
                5000,
                0,
                "created_at",
                true,
            )
            .await
        }
        AgencyRole::Owner => {
            let owners = list_rows(
                pool,
                "owners",
                Some(&json_map(&[
                    agency_filter.clone(),
                    ("user_id", Value::String(ctx.user_id.clone())),
                ])),
                100,
                0,
                "created_at",
                true,
            )
            .await?;
            let owner_ids = extract_ids(&owners, "id");
            if owner_ids.is_empty() {
                return Ok(Vec::new());
            }

            let properties = list_rows(
                pool,
                "properties",
                Some(&json_map(&[
                    agency_filter.clone(),
                    (
                        "owner_id",
                        Value::Array(owner_ids.into_iter().map(Value::String).collect()),
                    ),
                ])),
                1000,
                0,
                "created_at",
                true,
            )
            .await?;
            let property_ids = extract_ids(&properties, "id");
            if property_ids.is_empty() {
                return Ok(Vec::new());
            }

            list_rows(
                pool,
                "leases",
                Some(&json_map(&[
                    agency_filter,
                    (
                        "property_id",
                        Value::Array(property_ids.into_iter().map(Value::String).collect()),
                    ),
                ])),
                5000,
                0,
                "created_at",
                true,
            )
            .await
        }
        AgencyRole::Tenant => {
            let tenants = list_rows(
                pool,
                "tenants",
                Some(&json_map(&[
                    agency_filter.clone(),
                    ("user_id", Value::String(ctx.user_id.clone())),
                ])),
                100,
                0,
                "created_at",
                true,
            )
            .await?;
            let tenant_ids = extract_ids(&tenants, "id");
            if tenant_ids.is_empty() {
                return Ok(Vec::new());
            }

            list_rows(
                pool,
                "leases",
                Some(&json_map(&[
                    agency_filter,
                    (
                        "tenant_id",
                        Value::Array(tenant_ids.into_iter().map(Value::String).collect()),
                    ),
                ])),
                5000,
                0,
                "created_at",
                true,
            )
            .await
        }
    }
}

async fn fetch_property_names(
    pool: &PgPool,
    ctx: &AuthContext,
    leases: &[Value],
) -> AppResult<HashMap<String, String>> {
    let property_ids = extract_ids(leases, "property_id");
    if property_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let properties = list_rows(
        pool,
        "properties",
        Some(&json_map(&[
            ("agency_id", Value::String(ctx.agency_id.clone())),
            (
                "id",
                Value::Array(property_ids.into_iter().map(Value::String).collect()),
            ),
        ])),
        1000,
        0,
        "created_at",
        true,
    )
    .await?;

    let mut names = HashMap::new();
    for property in &properties {
        let id = value_str(property, "id");
        let name = value_str(property, "name");
        if !id.is_empty() && !name.is_empty() {
            names.insert(id, name);
        }
    }
    Ok(names)
}

/// Resolve the display name, preferring an embedded `property` relation.
/// Embedded relations may arrive as an object or a one-element array
/// depending on the join; both shapes are collapsed here.
fn resolve_property_name(
    lease: &Value,
    property_id: &str,
    property_names: &HashMap<String, String>,
) -> String {
    if let Some(related) = first_related(lease, "property") {
        let name = value_str(related, "name");
        if !name.is_empty() {
            return name;
        }
    }
    property_names
        .get(property_id)
        .cloned()
        .unwrap_or_else(|| "property".to_string())
}

fn first_related<'a>(row: &'a Value, key: &str) -> Option<&'a Value> {
    let related = row.as_object()?.get(key)?;
    match related {
        Value::Object(_) => Some(related),
        Value::Array(items) => items.first(),
        _ => None,
    }
}

fn all_day_span(date: NaiveDate, timezone: Tz) -> (String, String) {
    let start = local_midnight(date, timezone);
    let end = local_midnight(date + chrono::Duration::days(1), timezone);
    (start, end)
}

fn local_midnight(date: NaiveDate, timezone: Tz) -> String {
    let naive = date.and_time(NaiveTime::MIN);
    match timezone.from_local_datetime(&naive).earliest() {
        Some(local) => local.to_rfc3339(),
        // A DST gap at midnight; fall back to interpreting it as UTC.
        None => timezone.from_utc_datetime(&naive).to_rfc3339(),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn extract_ids(rows: &[Value], key: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    for row in rows {
        let id = value_str(row, key);
        if !id.is_empty() && seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    ids
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

fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{json, Value};

    use super::{plan_lease_expiry_sync, ReminderRules};
    use crate::auth::{AgencyRole, AuthContext};

    fn ctx() -> AuthContext {
        AuthContext {
            user_id: "11111111-1111-1111-1111-111111111111".to_string(),
            email: Some("admin@agency.do".to_string()),
            agency_id: "22222222-2222-2222-2222-222222222222".to_string(),
            role: AgencyRole::AgencyAdmin,
        }
    }

    fn rules() -> ReminderRules {
        ReminderRules::new(7, "09:00", "America/Santo_Domingo")
    }

    fn lease(id: &str, status: &str, end_date: &str) -> Value {
        json!({
            "id": id,
            "status": status,
            "end_date": end_date,
            "property_id": "p-1",
            "property": {"name": "Villa Larimar"}
        })
    }

    fn event(id: &str, lease_id: Option<&str>) -> Value {
        match lease_id {
            Some(lease_id) => json!({"id": id, "lease_id": lease_id}),
            None => json!({"id": id}),
        }
    }

    #[test]
    fn computes_alert_minutes_with_clamping() {
        assert_eq!(rules().alert_minutes_before(), 7 * 24 * 60 + 9 * 60);
        assert_eq!(
            ReminderRules::new(3, "14:30", "UTC").alert_minutes_before(),
            3 * 24 * 60 + 14 * 60 + 30
        );
        // Out-of-range components clamp instead of failing.
        assert_eq!(
            ReminderRules::new(-2, "25:99", "UTC").alert_minutes_before(),
            23 * 60 + 59
        );
        // Garbage time falls back to 09:00.
        assert_eq!(
            ReminderRules::new(0, "soon", "UTC").alert_minutes_before(),
            9 * 60
        );
    }

    #[test]
    fn inserts_event_for_new_lease() {
        let leases = vec![lease("l-1", "active", "2026-09-30")];
        let plan = plan_lease_expiry_sync(&ctx(), &leases, &[], &HashMap::new(), &rules());

        assert!(plan.duplicate_event_ids.is_empty());
        assert!(plan.updates.is_empty());
        assert!(plan.stale_event_ids.is_empty());
        assert_eq!(plan.inserts.len(), 1);

        let row = &plan.inserts[0];
        assert_eq!(row["event_type"], json!("lease_expiry"));
        assert_eq!(row["title"], json!("Lease expiry: Villa Larimar"));
        assert_eq!(row["all_day"], json!(true));
        // Santo Domingo is UTC-4 year round.
        assert_eq!(row["starts_at"], json!("2026-09-30T00:00:00-04:00"));
        assert_eq!(row["ends_at"], json!("2026-10-01T00:00:00-04:00"));
        assert_eq!(row["alert_minutes_before"], json!(7 * 24 * 60 + 9 * 60));
    }

    #[test]
    fn prunes_orphans_and_inserts_fresh_event() {
        // Three stale events without a lease_id plus one active lease.
        let leases = vec![lease("l-1", "active", "2026-06-15")];
        let existing = vec![event("e-1", None), event("e-2", None), event("e-3", None)];
        let plan = plan_lease_expiry_sync(&ctx(), &leases, &existing, &HashMap::new(), &rules());

        assert_eq!(plan.duplicate_event_ids, vec!["e-1", "e-2", "e-3"]);
        assert_eq!(plan.inserts.len(), 1);
        assert!(plan.updates.is_empty());
        assert!(plan.stale_event_ids.is_empty());
    }

    #[test]
    fn keeps_first_of_duplicate_events() {
        let leases = vec![lease("l-1", "active", "2026-06-15")];
        let existing = vec![
            event("e-old", Some("l-1")),
            event("e-dup-1", Some("l-1")),
            event("e-dup-2", Some("l-1")),
        ];
        let plan = plan_lease_expiry_sync(&ctx(), &leases, &existing, &HashMap::new(), &rules());

        assert_eq!(plan.duplicate_event_ids, vec!["e-dup-1", "e-dup-2"]);
        assert!(plan.inserts.is_empty());
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].0, "e-old");
    }

    #[test]
    fn deletes_event_for_terminated_lease() {
        let leases = vec![lease("l-1", "terminated", "2026-06-15")];
        let existing = vec![event("e-1", Some("l-1"))];
        let plan = plan_lease_expiry_sync(&ctx(), &leases, &existing, &HashMap::new(), &rules());

        assert_eq!(plan.stale_event_ids, vec!["e-1"]);
        assert!(plan.inserts.is_empty());
        assert!(plan.updates.is_empty());

        // A terminated lease with no event is simply skipped.
        let plan = plan_lease_expiry_sync(&ctx(), &leases, &[], &HashMap::new(), &rules());
        assert!(plan.stale_event_ids.is_empty());
        assert!(plan.inserts.is_empty());
    }

    #[test]
    fn second_run_converges() {
        let leases = vec![
            lease("l-1", "active", "2026-06-15"),
            lease("l-2", "active", "2026-08-01"),
        ];
        let first = plan_lease_expiry_sync(&ctx(), &leases, &[], &HashMap::new(), &rules());
        assert_eq!(first.inserts.len(), 2);

        // Simulate the store after the first run.
        let existing = vec![
            json!({"id": "e-1", "lease_id": "l-1"}),
            json!({"id": "e-2", "lease_id": "l-2"}),
        ];
        let second = plan_lease_expiry_sync(&ctx(), &leases, &existing, &HashMap::new(), &rules());
        assert!(second.inserts.is_empty());
        assert!(second.duplicate_event_ids.is_empty());
        assert!(second.stale_event_ids.is_empty());
        // Updates refresh on existence; the event set itself is unchanged.
        assert_eq!(second.updates.len(), 2);
    }

    #[test]
    fn skips_leases_without_end_date() {
        let leases = vec![json!({"id": "l-1", "status": "active", "property_id": "p-1"})];
        let plan = plan_lease_expiry_sync(&ctx(), &leases, &[], &HashMap::new(), &rules());
        assert!(plan.inserts.is_empty());
    }

    #[test]
    fn resolves_property_name_from_lookup_and_one_element_array() {
        let mut names = HashMap::new();
        names.insert("p-9".to_string(), "Casa Colonial".to_string());
        let leases = vec![json!({
            "id": "l-1",
            "status": "active",
            "end_date": "2026-12-01",
            "property_id": "p-9"
        })];
        let plan = plan_lease_expiry_sync(&ctx(), &leases, &[], &names, &rules());
        assert_eq!(plan.inserts[0]["title"], json!("Lease expiry: Casa Colonial"));

        // Embedded relation as a one-element array wins over the lookup.
        let leases = vec![json!({
            "id": "l-1",
            "status": "active",
            "end_date": "2026-12-01",
            "property_id": "p-9",
            "property": [{"name": "Loft Zona Colonial"}]
        })];
        let plan = plan_lease_expiry_sync(&ctx(), &leases, &[], &names, &rules());
        assert_eq!(
            plan.inserts[0]["title"],
            json!("Lease expiry: Loft Zona Colonial")
        );
    }
}

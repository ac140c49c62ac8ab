use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_currency_dop() -> String {
    "DOP".to_string()
}
fn default_timezone_santo_domingo() -> String {
    "America/Santo_Domingo".to_string()
}
fn default_tenant_role() -> String {
    "tenant".to_string()
}
fn default_property_status() -> String {
    "active".to_string()
}
fn default_city_santo_domingo() -> String {
    "Santo Domingo".to_string()
}
fn default_country_do() -> String {
    "DO".to_string()
}
fn default_lease_status() -> String {
    "active".to_string()
}
fn default_invoice_status() -> String {
    "open".to_string()
}
fn default_maintenance_status() -> String {
    "open".to_string()
}
fn default_maintenance_priority() -> String {
    "normal".to_string()
}
fn default_limit_100() -> i64 {
    100
}
fn default_limit_120() -> i64 {
    120
}
fn default_limit_500() -> i64 {
    500
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

// ---------------------------------------------------------------------------
// Agencies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateAgencyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub legal_name: Option<String>,
    pub rnc: Option<String>,
    #[serde(default = "default_currency_dop")]
    pub default_currency: String,
    #[serde(default = "default_timezone_santo_domingo")]
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateAgencyInput {
    pub name: Option<String>,
    pub legal_name: Option<String>,
    pub rnc: Option<String>,
    pub default_currency: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AgencyPath {
    pub agency_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AgencyMembersQuery {
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateAgencyMemberInput {
    pub user_id: String,
    #[serde(default = "default_tenant_role")]
    pub role: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AgencyMemberPath {
    pub agency_id: String,
    pub member_user_id: String,
}

// ---------------------------------------------------------------------------
// Properties / owners / tenants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PropertiesQuery {
    pub agency_id: String,
    pub status: Option<String>,
    pub owner_id: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePropertyInput {
    pub agency_id: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub code: Option<String>,
    #[serde(default = "default_property_status")]
    pub status: String,
    pub owner_id: Option<String>,
    pub address_line1: Option<String>,
    #[serde(default = "default_city_santo_domingo")]
    pub city: String,
    #[serde(default = "default_country_do")]
    pub country_code: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePropertyInput {
    pub name: Option<String>,
    pub code: Option<String>,
    pub status: Option<String>,
    pub owner_id: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PropertyPath {
    pub property_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OwnersQuery {
    pub agency_id: String,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateOwnerInput {
    pub agency_id: String,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(email)]
    pub email: Option<String>,
    pub phone_e164: Option<String>,
    pub user_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateOwnerInput {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone_e164: Option<String>,
    pub user_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OwnerPath {
    pub owner_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TenantsQuery {
    pub agency_id: String,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateTenantInput {
    pub agency_id: String,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(email)]
    pub email: Option<String>,
    pub phone_e164: Option<String>,
    pub document_number: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateTenantInput {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone_e164: Option<String>,
    pub document_number: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TenantPath {
    pub tenant_id: String,
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct LeasesQuery {
    pub agency_id: String,
    pub status: Option<String>,
    pub property_id: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateLeaseInput {
    pub agency_id: String,
    pub property_id: String,
    pub tenant_id: String,
    pub start_date: String,
    pub end_date: String,
    pub monthly_rent: f64,
    #[serde(default = "default_currency_dop")]
    pub currency: String,
    pub deposit: Option<f64>,
    #[serde(default = "default_lease_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateLeaseInput {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub monthly_rent: Option<f64>,
    pub currency: Option<String>,
    pub deposit: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct LeasePath {
    pub lease_id: String,
}

// ---------------------------------------------------------------------------
// Invoices / payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct InvoicesQuery {
    pub agency_id: String,
    pub lease_id: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "from")]
    pub from_date: Option<String>,
    #[serde(rename = "to")]
    pub to_date: Option<String>,
    #[serde(default = "default_limit_120")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateInvoiceInput {
    pub agency_id: String,
    pub lease_id: String,
    pub amount: f64,
    #[serde(default = "default_currency_dop")]
    pub currency: String,
    pub due_date: String,
    pub concept: Option<String>,
    #[serde(default = "default_invoice_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateInvoiceInput {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub due_date: Option<String>,
    pub concept: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct InvoicePath {
    pub invoice_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PaymentsQuery {
    pub agency_id: String,
    pub owner_id: Option<String>,
    pub property_id: Option<String>,
    pub currency: Option<String>,
    pub method: Option<String>,
    #[serde(rename = "from")]
    pub from_date: Option<String>,
    #[serde(rename = "to")]
    pub to_date: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreatePaymentInput {
    pub agency_id: String,
    pub invoice_id: Option<String>,
    pub lease_id: Option<String>,
    pub owner_id: Option<String>,
    pub property_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub method: String,
    pub paid_on: String,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePaymentInput {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub paid_on: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PaymentPath {
    pub payment_id: String,
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct MaintenanceQuery {
    pub agency_id: String,
    pub status: Option<String>,
    pub property_id: Option<String>,
    #[serde(default = "default_limit_120")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateMaintenanceRequestInput {
    pub agency_id: String,
    pub property_id: String,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_maintenance_priority")]
    pub priority: String,
    #[serde(default = "default_maintenance_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateMaintenanceRequestInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct MaintenanceRequestPath {
    pub request_id: String,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ManagerReportsQuery {
    pub agency_id: String,
    pub month: Option<String>,
    #[serde(default = "default_limit_120")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OwnerReportsQuery {
    pub agency_id: String,
    pub owner_id: Option<String>,
    pub month: Option<String>,
    #[serde(default = "default_limit_120")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct GenerateManagerReportInput {
    pub agency_id: String,
    pub month: String,
    pub start_date: String,
    pub end_date: String,
    pub avg_rate: Option<f64>,
    pub fee_percent: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateManagerReportInput {
    pub avg_rate: Option<f64>,
    pub fee_percent: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct GenerateOwnerReportsInput {
    pub agency_id: String,
    pub month: String,
    pub start_date: String,
    pub end_date: String,
    pub avg_rate: Option<f64>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateOwnerReportInput {
    pub avg_rate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ReportPeriodQuery {
    pub agency_id: String,
    pub month: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ReportPath {
    pub report_id: String,
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CalendarEventsQuery {
    pub agency_id: String,
    pub event_type: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct LeaseExpirySyncInput {
    pub agency_id: String,
    pub alert_days: Option<i64>,
    pub alert_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CalendarEventPath {
    pub event_id: String,
}

// ---------------------------------------------------------------------------
// Documents / notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DocumentsQuery {
    pub agency_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    #[serde(default = "default_limit_120")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DocumentUploadQuery {
    pub agency_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DocumentPath {
    pub document_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DocumentsArchiveQuery {
    pub agency_id: String,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct SendEmailInput {
    pub agency_id: String,
    #[validate(email)]
    pub to: String,
    #[validate(length(min = 1, max = 255))]
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct EmailLogsQuery {
    pub agency_id: String,
    #[serde(default = "default_limit_120")]
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::{clamp_limit_in_range, remove_nulls, serialize_to_map};
    use serde_json::{json, Value};

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(0, 1, 1000), 1);
        assert_eq!(clamp_limit_in_range(50, 1, 1000), 50);
        assert_eq!(clamp_limit_in_range(9999, 1, 1000), 1000);
    }

    #[test]
    fn serializes_and_strips_nulls() {
        let input = super::UpdateLeaseInput {
            start_date: None,
            end_date: Some("2026-12-31".to_string()),
            monthly_rent: Some(950.0),
            currency: None,
            deposit: None,
            status: None,
        };
        let map = remove_nulls(serialize_to_map(&input));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("end_date"), Some(&json!("2026-12-31")));
        assert_eq!(map.get("monthly_rent"), Some(&Value::from(950.0)));
    }
}

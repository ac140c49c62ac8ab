use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::create_row,
    state::AppState,
};

/// Send a transactional email through the configured Resend-compatible API
/// and record the attempt in `email_logs`. The log write is best effort; the
/// send result is what the caller sees.
pub async fn send_email(
    state: &AppState,
    agency_id: &str,
    sent_by_user_id: &str,
    to: &str,
    subject: &str,
    body_html: Option<&str>,
    body_text: Option<&str>,
) -> AppResult<Value> {
    let api_key = state.config.resend_api_key.as_deref().ok_or_else(|| {
        AppError::Dependency("Email is not configured. Set RESEND_API_KEY.".to_string())
    })?;

    let mut payload = json!({
        "from": state.config.email_from_address,
        "to": [to],
        "subject": subject,
    });
    if let Some(html) = body_html.map(str::trim).filter(|value| !value.is_empty()) {
        payload["html"] = Value::String(html.to_string());
    }
    if let Some(text) = body_text.map(str::trim).filter(|value| !value.is_empty()) {
        payload["text"] = Value::String(text.to_string());
    }
    if payload.get("html").is_none() && payload.get("text").is_none() {
        return Err(AppError::BadRequest(
            "Email needs an HTML or text body.".to_string(),
        ));
    }

    let url = format!(
        "{}/emails",
        state.config.resend_api_url.trim_end_matches('/')
    );
    let response = state
        .http_client
        .post(&url)
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Email API request failed");
            AppError::Dependency("Email API request failed.".to_string())
        })?;

    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    let provider_id = body
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let log_status = if status.is_success() { "sent" } else { "failed" };
    write_email_log(
        state,
        agency_id,
        sent_by_user_id,
        to,
        subject,
        log_status,
        &provider_id,
    )
    .await;

    if !status.is_success() {
        tracing::error!(status = %status, "Email API returned non-success status");
        return Err(AppError::Dependency(format!(
            "Email API failed with status {status}."
        )));
    }

    Ok(json!({
        "status": "sent",
        "provider_id": provider_id,
        "to": to,
    }))
}

async fn write_email_log(
    state: &AppState,
    agency_id: &str,
    sent_by_user_id: &str,
    to: &str,
    subject: &str,
    status: &str,
    provider_id: &str,
) {
    let Some(pool) = state.db_pool.as_ref() else {
        return;
    };

    let mut row = Map::new();
    row.insert(
        "agency_id".to_string(),
        Value::String(agency_id.to_string()),
    );
    row.insert(
        "sent_by_user_id".to_string(),
        Value::String(sent_by_user_id.to_string()),
    );
    row.insert("recipient".to_string(), Value::String(to.to_string()));
    row.insert("subject".to_string(), Value::String(subject.to_string()));
    row.insert("status".to_string(), Value::String(status.to_string()));
    if !provider_id.is_empty() {
        row.insert(
            "provider_id".to_string(),
            Value::String(provider_id.to_string()),
        );
    }

    if let Err(error) = create_row(pool, "email_logs", &row).await {
        tracing::warn!(error = %error, "Email log write failed");
    }
}

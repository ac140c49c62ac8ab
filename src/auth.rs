use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::{error::AppError, state::AppState, tenancy};

/// Roles a user can hold inside an agency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgencyRole {
    AgencyAdmin,
    Owner,
    Tenant,
}

impl AgencyRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgencyAdmin => "agency_admin",
            Self::Owner => "owner",
            Self::Tenant => "tenant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "agency_admin" => Some(Self::AgencyAdmin),
            "owner" => Some(Self::Owner),
            "tenant" => Some(Self::Tenant),
            _ => None,
        }
    }
}

/// The authenticated principal, before any agency scoping.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// Explicit per-request authorization context. Core operations receive this
/// instead of reading an ambient session.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: Option<String>,
    pub agency_id: String,
    pub role: AgencyRole,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    #[allow(dead_code)]
    exp: Option<usize>,
}

pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_value(headers, "x-user-id") {
            return Ok(AuthUser {
                id: user_id,
                email: header_value(headers, "x-user-email"),
            });
        }
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing bearer token.".to_string())
    })?;

    let secret = state.config.jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("Authentication is not configured. Set JWT_SECRET.".to_string())
    })?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    let decoded = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "JWT validation failed");
        AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string())
    })?;

    if decoded.claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: token has no subject.".to_string(),
        ));
    }

    Ok(AuthUser {
        id: decoded.claims.sub,
        email: decoded.claims.email,
    })
}

pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    Ok(require_user(state, headers).await?.id)
}

/// Resolve the caller's role inside `agency_id` and return the full context.
/// The master admin (by configured email) is treated as an agency_admin of
/// every agency.
pub async fn require_auth(
    state: &AppState,
    headers: &HeaderMap,
    agency_id: &str,
) -> Result<AuthContext, AppError> {
    let user = require_user(state, headers).await?;

    if let (Some(master), Some(email)) = (
        state.config.master_admin_email.as_deref(),
        user.email.as_deref(),
    ) {
        if email.eq_ignore_ascii_case(master.trim()) {
            return Ok(AuthContext {
                user_id: user.id,
                email: user.email,
                agency_id: agency_id.to_string(),
                role: AgencyRole::AgencyAdmin,
            });
        }
    }

    let membership = tenancy::assert_agency_member(state, &user.id, agency_id).await?;
    let role = membership
        .get("role")
        .and_then(Value::as_str)
        .and_then(AgencyRole::parse)
        .ok_or_else(|| {
            AppError::Forbidden("Forbidden: membership has an unknown role.".to_string())
        })?;

    Ok(AuthContext {
        user_id: user.id,
        email: user.email,
        agency_id: agency_id.to_string(),
        role,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let trimmed = raw.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{bearer_token, AgencyRole};
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn parses_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcg=="),
        );
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn parses_roles() {
        assert_eq!(AgencyRole::parse("agency_admin"), Some(AgencyRole::AgencyAdmin));
        assert_eq!(AgencyRole::parse(" owner "), Some(AgencyRole::Owner));
        assert_eq!(AgencyRole::parse("staff"), None);
        assert_eq!(AgencyRole::Tenant.as_str(), "tenant");
    }
}

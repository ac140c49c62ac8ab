#![allow(dead_code)]

use serde_json::{json, Value};
use sqlx::{PgPool, Row};

use crate::{auth::AuthUser, error::AppError, state::AppState};

fn db_pool(state: &AppState) -> Result<&PgPool, AppError> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

pub async fn get_agency_membership(
    state: &AppState,
    user_id: &str,
    agency_id: &str,
) -> Result<Option<Value>, AppError> {
    let cache_key = (user_id.to_string(), agency_id.to_string());
    if let Some(cached) = state.membership_cache.get(&cache_key).await {
        return Ok(cached);
    }

    let pool = db_pool(state)?;
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM agency_members t
         WHERE agency_id = $1::uuid AND user_id = $2::uuid
         LIMIT 1",
    )
    .bind(agency_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Database request failed: {error}")))?;

    let membership =
        row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten());
    state
        .membership_cache
        .insert(cache_key, membership.clone())
        .await;
    Ok(membership)
}

pub async fn assert_agency_member(
    state: &AppState,
    user_id: &str,
    agency_id: &str,
) -> Result<Value, AppError> {
    get_agency_membership(state, user_id, agency_id)
        .await?
        .ok_or_else(|| {
            AppError::Forbidden("Forbidden: not a member of this agency.".to_string())
        })
}

pub async fn assert_agency_role(
    state: &AppState,
    user_id: &str,
    agency_id: &str,
    allowed_roles: &[&str],
) -> Result<Value, AppError> {
    let membership = assert_agency_member(state, user_id, agency_id).await?;
    let role = membership
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    if allowed_roles.contains(&role) {
        return Ok(membership);
    }

    Err(AppError::Forbidden(format!(
        "Forbidden: role '{role}' is not allowed for this action."
    )))
}

pub async fn ensure_app_user(state: &AppState, user: &AuthUser) -> Result<Value, AppError> {
    if user.id.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: missing user.".to_string(),
        ));
    }
    let Some(email) = user.email.as_ref() else {
        return Err(AppError::BadRequest(
            "Authenticated user is missing an email address.".to_string(),
        ));
    };

    let full_name = email
        .split('@')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("User")
        .to_string();

    let pool = db_pool(state)?;
    sqlx::query(
        "INSERT INTO app_users (id, email, full_name)
         VALUES ($1::uuid, $2, $3)
         ON CONFLICT (id)
         DO UPDATE SET email = EXCLUDED.email",
    )
    .bind(&user.id)
    .bind(email)
    .bind(&full_name)
    .execute(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Database request failed: {error}")))?;

    Ok(json!({
        "id": user.id,
        "email": email,
        "full_name": full_name
    }))
}

pub async fn list_user_agency_ids(
    state: &AppState,
    user_id: &str,
) -> Result<Vec<String>, AppError> {
    let pool = db_pool(state)?;
    let rows = sqlx::query(
        "SELECT agency_id::text AS agency_id
         FROM agency_members
         WHERE user_id = $1::uuid
         LIMIT 500",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Database request failed: {error}")))?;

    let mut agency_ids = Vec::new();
    for row in rows {
        if let Ok(value) = row.try_get::<String, _>("agency_id") {
            if !value.is_empty() {
                agency_ids.push(value);
            }
        }
    }
    Ok(agency_ids)
}

pub async fn list_user_agencies(state: &AppState, user_id: &str) -> Result<Vec<Value>, AppError> {
    let pool = db_pool(state)?;
    let agency_ids = list_user_agency_ids(state, user_id).await?;
    if agency_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM agencies t
         WHERE id = ANY($1::uuid[])
         LIMIT 500",
    )
    .bind(&agency_ids)
    .fetch_all(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Database request failed: {error}")))?;

    let mut agencies = Vec::new();
    for row in rows {
        if let Ok(Some(item)) = row.try_get::<Option<Value>, _>("row") {
            agencies.push(item);
        }
    }
    Ok(agencies)
}

pub async fn ensure_agency_membership(
    state: &AppState,
    agency_id: &str,
    user_id: &str,
    role: &str,
) -> Result<(), AppError> {
    let pool = db_pool(state)?;
    sqlx::query(
        "INSERT INTO agency_members (agency_id, user_id, role)
         VALUES ($1::uuid, $2::uuid, $3::agency_role)
         ON CONFLICT (agency_id, user_id)
         DO UPDATE SET role = EXCLUDED.role",
    )
    .bind(agency_id)
    .bind(user_id)
    .bind(role)
    .execute(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Database request failed: {error}")))?;

    state
        .membership_cache
        .invalidate(&(user_id.to_string(), agency_id.to_string()))
        .await;
    Ok(())
}

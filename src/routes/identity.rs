use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::{
    auth::require_user,
    error::AppResult,
    state::AppState,
    tenancy::{ensure_app_user, list_user_agencies},
};

/// Bootstrap endpoint for a signed-in user: upsert the app_users row and
/// return the agencies the user belongs to.
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    let profile = ensure_app_user(&state, &user).await?;
    let agencies = list_user_agencies(&state, &user.id).await?;

    Ok(Json(json!({
        "user": profile,
        "agencies": agencies,
    })))
}

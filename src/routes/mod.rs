use axum::{routing::get, Router};

use crate::state::AppState;

pub mod agencies;
pub mod calendar;
pub mod documents;
pub mod health;
pub mod identity;
pub mod invoices;
pub mod leases;
pub mod maintenance;
pub mod notifications;
pub mod owners;
pub mod payments;
pub mod properties;
pub mod reports;
pub mod tenants;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/me", get(identity::me))
        .merge(agencies::router())
        .merge(properties::router())
        .merge(owners::router())
        .merge(tenants::router())
        .merge(leases::router())
        .merge(invoices::router())
        .merge(payments::router())
        .merge(maintenance::router())
        .merge(reports::router())
        .merge(calendar::router())
        .merge(documents::router())
        .merge(notifications::router())
}

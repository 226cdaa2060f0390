use axum::{routing::get, Router};

pub mod catalog;
pub mod common;
pub mod contracts;
pub mod intake;
pub mod periods;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/deferred-revenue", get(contracts::deferred_revenue_summary))
        .route("/trace/:source_system/:source_id", get(intake::trace))
        .nest("/ssp-books", catalog::router())
        .nest("/contracts", contracts::router())
        .nest("/periods", periods::router())
        .nest("/source-events", intake::router())
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use forgerev_contracts::SourceEventKey;
use forgerev_intake::SourceEventInput;

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_source_events).post(ingest))
        .route("/:source_system/:source_id", get(get_source_event))
        .route("/:source_system/:source_id/retry", post(retry_source_event))
}

pub async fn ingest(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<SourceEventInput>,
) -> axum::response::Response {
    match services.engine().ingest(tenant.tenant_id(), body) {
        Ok(outcome) if outcome.duplicate => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_source_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::SourceEventsQuery>,
) -> axum::response::Response {
    common::items(services.engine().source_events(tenant.tenant_id(), query.errors_only))
}

pub async fn get_source_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((source_system, source_id)): Path<(String, String)>,
) -> axum::response::Response {
    let key = SourceEventKey::new(source_system, source_id);
    match services.engine().source_event(tenant.tenant_id(), &key) {
        Some(ev) => (StatusCode::OK, Json(ev)).into_response(),
        None => errors::not_found(format!("source event {key}")),
    }
}

pub async fn retry_source_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((source_system, source_id)): Path<(String, String)>,
) -> axum::response::Response {
    let key = SourceEventKey::new(source_system, source_id);
    common::respond(StatusCode::OK, services.engine().retry_source_event(tenant.tenant_id(), &key))
}

/// Audit trail from a source event to its contract, obligations and postings.
pub async fn trace(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((source_system, source_id)): Path<(String, String)>,
) -> axum::response::Response {
    let key = SourceEventKey::new(source_system, source_id);
    common::respond(StatusCode::OK, services.engine().trace(tenant.tenant_id(), &key))
}

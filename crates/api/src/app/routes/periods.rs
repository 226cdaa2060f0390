use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use forgerev_core::LedgerId;
use forgerev_infra::EngineError;
use forgerev_periods::{Period, PeriodId};

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_periods).post(define_period))
        .route("/:period_id", get(get_period))
        .route("/:period_id/future", post(mark_future))
        .route("/:period_id/open", post(open_period))
        .route("/:period_id/sweep", post(sweep_period))
        .route("/:period_id/close-readiness", get(close_readiness))
        .route("/:period_id/close", post(close_period))
        .route("/:period_id/reopen", post(reopen_period))
        .route("/:period_id/permanently-close", post(permanently_close_period))
}

fn period_id(raw: &str) -> Result<PeriodId, axum::response::Response> {
    common::parse_aggregate_id(raw, "period").map(PeriodId::new)
}

fn period_response(status: StatusCode, result: Result<Period, EngineError>) -> axum::response::Response {
    match result {
        Ok(p) => (status, Json(dto::period_to_json(&p))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_periods(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::PeriodsQuery>,
) -> axum::response::Response {
    let ledger = match query.ledger_id.map(LedgerId::new).transpose() {
        Ok(l) => l,
        Err(e) => return errors::bad_request(e.to_string()),
    };
    let items = services
        .engine()
        .periods(tenant.tenant_id(), ledger.as_ref())
        .iter()
        .map(dto::period_to_json)
        .collect::<Vec<_>>();
    common::items(items)
}

pub async fn define_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::DefinePeriodRequest>,
) -> axum::response::Response {
    let result = services
        .engine()
        .define_period(tenant.tenant_id(), &body.ledger_id, &body.name, body.start, body.end);
    period_response(StatusCode::CREATED, result)
}

pub async fn get_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match period_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    period_response(StatusCode::OK, services.engine().period(tenant.tenant_id(), id))
}

pub async fn mark_future(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match period_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    period_response(StatusCode::OK, services.engine().mark_period_future(tenant.tenant_id(), id))
}

pub async fn open_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match period_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    period_response(StatusCode::OK, services.engine().open_period(tenant.tenant_id(), id))
}

pub async fn sweep_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match period_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    common::respond(StatusCode::OK, services.engine().sweep(tenant.tenant_id(), id))
}

pub async fn close_readiness(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match period_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    common::respond(StatusCode::OK, services.engine().can_close(tenant.tenant_id(), id))
}

pub async fn close_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
    body: Option<Json<dto::ClosePeriodRequest>>,
) -> axum::response::Response {
    let id = match period_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let actor = match body.actor.as_deref().map(common::parse_user_id).transpose() {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    period_response(StatusCode::OK, services.engine().close_period(tenant.tenant_id(), id, actor))
}

pub async fn reopen_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
    Json(body): Json<dto::ReopenPeriodRequest>,
) -> axum::response::Response {
    let id = match period_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let actor = match common::parse_user_id(&body.actor) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let result = services
        .engine()
        .reopen_period(tenant.tenant_id(), id, actor, &body.reason);
    period_response(StatusCode::OK, result)
}

pub async fn permanently_close_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
    Json(body): Json<dto::PermanentlyClosePeriodRequest>,
) -> axum::response::Response {
    let id = match period_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let actor = match common::parse_user_id(&body.actor) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let result = services
        .engine()
        .permanently_close_period(tenant.tenant_id(), id, actor);
    period_response(StatusCode::OK, result)
}

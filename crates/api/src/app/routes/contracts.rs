use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use forgerev_contracts::ContractId;
use forgerev_infra::engine::ContractDraft;

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_contracts).post(draft_contract))
        .route("/by-number/:number", get(get_contract_by_number))
        .route("/:contract_id", get(get_contract))
        .route("/:contract_id/allocate", post(allocate_contract))
        .route("/:contract_id/cancel", post(cancel_contract))
        .route("/:contract_id/obligations", get(list_obligations))
        .route("/:contract_id/schedule", get(get_schedule))
        .route("/:contract_id/deferred-revenue", get(get_deferred_revenue))
}

fn contract_id(raw: &str) -> Result<ContractId, axum::response::Response> {
    common::parse_aggregate_id(raw, "contract").map(ContractId::new)
}

pub async fn list_contracts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let items = services
        .engine()
        .contracts(tenant.tenant_id())
        .iter()
        .map(dto::contract_summary_to_json)
        .collect::<Vec<_>>();
    common::items(items)
}

pub async fn draft_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<ContractDraft>,
) -> axum::response::Response {
    match services.engine().draft_contract(tenant.tenant_id(), &body) {
        Ok(c) => (StatusCode::CREATED, Json(dto::contract_to_json(&c))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match contract_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.engine().contract(tenant.tenant_id(), id) {
        Ok(c) => (StatusCode::OK, Json(dto::contract_to_json(&c))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_contract_by_number(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(number): Path<String>,
) -> axum::response::Response {
    match services.engine().contract_by_number(tenant.tenant_id(), &number) {
        Some(c) => (StatusCode::OK, Json(dto::contract_to_json(&c))).into_response(),
        None => errors::not_found(format!("contract {number}")),
    }
}

pub async fn allocate_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match contract_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.engine().allocate_contract(tenant.tenant_id(), id) {
        Ok(c) => (StatusCode::OK, Json(dto::contract_to_json(&c))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn cancel_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
    Json(body): Json<dto::CancelContractRequest>,
) -> axum::response::Response {
    let id = match contract_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.engine().cancel_contract(tenant.tenant_id(), id, &body.reason) {
        Ok(c) => (StatusCode::OK, Json(dto::contract_to_json(&c))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_obligations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
    Query(query): Query<dto::ObligationsQuery>,
) -> axum::response::Response {
    let id = match contract_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.engine().obligations(tenant.tenant_id(), id, query.version) {
        Ok(items) => common::items(items),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match contract_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let engine = services.engine();
    if let Err(e) = engine.contract(tenant.tenant_id(), id) {
        return errors::engine_error_to_response(e);
    }
    common::items(engine.contract_schedule(tenant.tenant_id(), id))
}

pub async fn get_deferred_revenue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match contract_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    common::respond(StatusCode::OK, services.engine().deferred_revenue(tenant.tenant_id(), id))
}

pub async fn deferred_revenue_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let summary = services.engine().deferred_revenue_summary(tenant.tenant_id());
    (StatusCode::OK, Json(summary)).into_response()
}

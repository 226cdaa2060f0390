use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use forgerev_catalog::{ItemId, SspBookId, SspLineId};
use forgerev_infra::EngineError;

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/resolve", get(resolve_ssp))
        .route("/:book_id", get(get_book))
        .route("/:book_id/default", post(designate_default))
        .route("/:book_id/lines", post(add_line))
        .route("/:book_id/lines/:line_id", put(amend_line))
}

fn book_id(raw: &str) -> Result<SspBookId, axum::response::Response> {
    common::parse_aggregate_id(raw, "ssp book").map(SspBookId::new)
}

pub async fn list_books(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let engine = services.engine();
    let default = engine.default_book(tenant.tenant_id());
    let items = engine
        .ssp_books(tenant.tenant_id())
        .into_iter()
        .map(|b| {
            let is_default = default == Some(b.id_typed());
            dto::ssp_book_to_json(b, is_default)
        })
        .collect::<Vec<_>>();
    common::items(items)
}

pub async fn create_book(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::CreateSspBookRequest>,
) -> axum::response::Response {
    let engine = services.engine();
    let book = match engine.create_ssp_book(tenant.tenant_id(), &body.name, &body.currency) {
        Ok(b) => b,
        Err(e) => return errors::engine_error_to_response(e),
    };
    if body.default {
        if let Err(e) = engine.designate_default_book(tenant.tenant_id(), book.id_typed()) {
            return errors::engine_error_to_response(e);
        }
    }
    (StatusCode::CREATED, Json(dto::ssp_book_to_json(book, body.default))).into_response()
}

pub async fn get_book(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match book_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let engine = services.engine();
    match engine.ssp_book(tenant.tenant_id(), id) {
        Some(b) => {
            let is_default = engine.default_book(tenant.tenant_id()) == Some(id);
            (StatusCode::OK, Json(dto::ssp_book_to_json(b, is_default))).into_response()
        }
        None => errors::not_found(format!("ssp book {id}")),
    }
}

pub async fn designate_default(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
) -> axum::response::Response {
    let id = match book_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.engine().designate_default_book(tenant.tenant_id(), id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(raw): Path<String>,
    Json(body): Json<dto::AddSspLineRequest>,
) -> axum::response::Response {
    let id = match book_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = ItemId::new(body.item_id).map_err(EngineError::from).and_then(|item_id| {
        services.engine().add_ssp_line(
            tenant.tenant_id(),
            id,
            item_id,
            body.unit_price,
            body.min_quantity,
            body.effective_from,
        )
    });
    common::respond(StatusCode::CREATED, result)
}

pub async fn amend_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((raw_book, raw_line)): Path<(String, String)>,
    Json(body): Json<dto::AmendSspLineRequest>,
) -> axum::response::Response {
    let id = match book_id(&raw_book) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let line_id = match uuid::Uuid::from_str(raw_line.trim()) {
        Ok(u) => SspLineId(u),
        Err(e) => return errors::bad_request(format!("invalid ssp line id: {e}")),
    };
    let result = services
        .engine()
        .amend_ssp_line(tenant.tenant_id(), id, line_id, body.unit_price, body.min_quantity);
    common::respond(StatusCode::OK, result)
}

pub async fn resolve_ssp(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::ResolveSspQuery>,
) -> axum::response::Response {
    let book = match query.book_id.as_deref().map(book_id).transpose() {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let result = ItemId::new(query.item_id)
        .map_err(EngineError::from)
        .and_then(|item_id| services.engine().resolve_ssp(tenant.tenant_id(), &item_id, query.as_of, book));
    common::respond(StatusCode::OK, result)
}

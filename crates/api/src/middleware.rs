use std::str::FromStr;

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use forgerev_core::TenantId;

use crate::app::errors;
use crate::context::TenantContext;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Resolve the tenant from `x-tenant-id` and attach it to the request.
pub async fn tenant_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let tenant_id = match extract_tenant(req.headers()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    next.run(req).await
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, Response> {
    let header = headers.get(TENANT_HEADER).ok_or_else(|| {
        errors::json_error(StatusCode::UNAUTHORIZED, "missing_tenant", "x-tenant-id header is required")
    })?;

    let raw = header
        .to_str()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_tenant", "x-tenant-id is not ascii"))?;

    TenantId::from_str(raw.trim())
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_tenant", e.to_string()))
}

pub async fn log_request(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let resp = next.run(req).await;
    tracing::debug!(%method, %path, status = resp.status().as_u16(), "request handled");
    resp
}

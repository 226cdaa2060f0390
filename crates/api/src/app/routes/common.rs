use std::str::FromStr;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use forgerev_core::{AggregateId, UserId};
use forgerev_infra::EngineError;

use crate::app::errors;

/// Parse an aggregate id path segment, mapping failures to a 400.
pub fn parse_aggregate_id(raw: &str, what: &str) -> Result<AggregateId, axum::response::Response> {
    AggregateId::from_str(raw.trim()).map_err(|e| errors::bad_request(format!("invalid {what} id: {e}")))
}

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    UserId::from_str(raw.trim()).map_err(|e| errors::bad_request(format!("invalid actor: {e}")))
}

pub fn respond<T: Serialize>(status: StatusCode, result: Result<T, EngineError>) -> axum::response::Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub fn items<T: Serialize>(items: Vec<T>) -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use forgerev_infra::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    let code = err.code();
    let message = err.to_string();
    match err {
        EngineError::SspNotFound { item_id, as_of, line_no } => json_error_with(
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            message,
            json!({ "item_id": item_id, "as_of": as_of, "line_no": line_no }),
        ),
        EngineError::AllocationDegenerate { remainder } => json_error_with(
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            message,
            json!({ "remainder": remainder }),
        ),
        EngineError::VersionConflict { reference, attempts } => json_error_with(
            StatusCode::CONFLICT,
            code,
            message,
            json!({ "reference": reference, "attempts": attempts }),
        ),
        EngineError::PeriodNotReady { period_id, exceptions } => json_error_with(
            StatusCode::CONFLICT,
            code,
            message,
            json!({ "period_id": period_id, "exceptions": exceptions }),
        ),
        EngineError::SourceEventError { source_key, reason } => json_error_with(
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            message,
            json!({ "source_key": source_key, "reason": reason }),
        ),
        EngineError::ScheduleImmutableViolation { entry_id, status } => json_error_with(
            StatusCode::CONFLICT,
            code,
            message,
            json!({ "entry_id": entry_id, "status": status }),
        ),
        EngineError::NotFound(_) => json_error(StatusCode::NOT_FOUND, code, message),
        EngineError::Validation(_) => json_error(StatusCode::BAD_REQUEST, code, message),
        EngineError::Invariant(_) => json_error(StatusCode::UNPROCESSABLE_ENTITY, code, message),
        EngineError::Conflict(_) => json_error(StatusCode::CONFLICT, code, message),
        EngineError::Infrastructure(_) => {
            tracing::error!(error = %message, "engine infrastructure failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, code, message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// `json_error` with extra context fields merged into the body.
pub fn json_error_with(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    details: serde_json::Value,
) -> axum::response::Response {
    let mut body = json!({
        "error": code,
        "message": message.into(),
    });
    if let (Some(body), serde_json::Value::Object(details)) = (body.as_object_mut(), details) {
        body.extend(details);
    }
    (status, axum::Json(body)).into_response()
}

pub fn not_found(what: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", format!("{} not found", what.into()))
}

pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation", message)
}

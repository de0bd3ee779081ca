use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use medrelay_infra::FeedbackStoreError;

/// `{status:"error", message, code?}` with the given HTTP status.
pub fn json_error(
    status: StatusCode,
    code: Option<&str>,
    message: impl Into<String>,
) -> axum::response::Response {
    let mut body = json!({
        "status": "error",
        "message": message.into(),
    });
    if let Some(code) = code {
        body["code"] = json!(code);
    }
    (status, axum::Json(body)).into_response()
}

/// Status and client-facing message for a failed feedback write.
pub fn feedback_error_status(err: &FeedbackStoreError) -> (StatusCode, &'static str) {
    match err {
        FeedbackStoreError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Database connection timed out"),
        FeedbackStoreError::ConnectionRefused(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Could not connect to database")
        }
        FeedbackStoreError::Duplicate(_) => (StatusCode::CONFLICT, "Duplicate message ID"),
        FeedbackStoreError::MissingField(_) => (StatusCode::BAD_REQUEST, "Missing required fields"),
        FeedbackStoreError::Storage { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store feedback")
        }
    }
}

pub fn feedback_error_to_response(err: &FeedbackStoreError) -> axum::response::Response {
    let (status, message) = feedback_error_status(err);
    json_error(status, err.code(), message)
}

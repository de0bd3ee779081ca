//! Message feedback endpoint.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::{error, info};

use medrelay_infra::{FeedbackRecord, FeedbackStore};

use crate::app::dto::FeedbackResponse;
use crate::app::errors::{feedback_error_to_response, json_error};
use crate::app::services::AppServices;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new().route("/feedback", post(submit_feedback))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/feedback
///
/// Body: `{messageId, feedback: 0|1, messageContent, timestamp}`. Resubmitting
/// the same `messageId` updates the stored vote.
pub async fn submit_feedback(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<FeedbackRecord>, JsonRejection>,
) -> Response {
    let record = match body {
        Ok(Json(record)) if record.is_valid() => record,
        _ => return json_error(StatusCode::BAD_REQUEST, None, "Invalid request body"),
    };

    match services.feedback.upsert(&record).await {
        Ok(stored) => {
            info!(message_id = %record.message_id, row_id = stored.id, feedback = stored.feedback, "feedback stored");
            Json(FeedbackResponse::stored(stored)).into_response()
        }
        Err(err) => {
            error!(
                message_id = %record.message_id,
                code = err.code().unwrap_or("none"),
                error = %err,
                "failed to store feedback"
            );
            feedback_error_to_response(&err)
        }
    }
}

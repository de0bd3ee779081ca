//! Streaming chat relay.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    response::Response,
    routing::post,
};
use tracing::{debug, warn};

use medrelay_stream::error_response;

use crate::app::dto::{ChatRequest, ChatUpstreamRequest};
use crate::app::services::AppServices;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new().route("/chat", post(chat))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/chat
///
/// Forwards `{query, persona}` to the chat backend and relays its frames as
/// Server-Sent Events. Every failure is reported in-band as a single
/// `{status:"error", message}` frame, so the response is always an SSE stream.
pub async fn chat(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "unreadable chat request");
            return error_response(rejection.body_text());
        }
    };

    let Some(query) = request.query() else {
        return error_response("No query provided");
    };

    let upstream = services
        .http
        .post(services.config.chat_stream_url())
        .json(&ChatUpstreamRequest {
            query,
            persona: request.persona(),
        })
        .send()
        .await;

    match upstream {
        Ok(response) => {
            debug!(status = response.status().as_u16(), persona = request.persona(), "chat backend answered");
            services.relay.relay(response)
        }
        Err(err) => {
            warn!(error = %err, "chat backend unreachable");
            error_response(err.to_string())
        }
    }
}

//! Image analysis forwarding and backend health check.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use crate::app::dto::{AnalyzeError, AnalyzeRequest};
use crate::app::errors::json_error;
use crate::app::services::AppServices;

/// Largest accepted request body; images arrive base64-encoded.
pub const MAX_IMAGE_BODY_BYTES: usize = 10 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/calculator", post(analyze).get(backend_status))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BODY_BYTES))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/calculator
///
/// Forwards `{image}` to the analysis backend and returns its JSON verbatim.
pub async fn analyze(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return analyze_error(rejection.body_text()),
    };

    match forward_image(&services, &request).await {
        Ok(result) => Json(result).into_response(),
        Err(details) => {
            warn!(details = %details, "image analysis failed");
            analyze_error(details)
        }
    }
}

/// GET /api/calculator
///
/// Reports whether the analysis backend is reachable.
pub async fn backend_status(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match check_backend(&services).await {
        Ok(status) => Json(json!({ "status": status })).into_response(),
        Err(err) => {
            warn!(error = %err, "analysis backend health check failed");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                None,
                "Backend server is not available",
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn forward_image(services: &AppServices, request: &AnalyzeRequest) -> Result<JsonValue, String> {
    let response = services
        .http
        .post(services.config.analysis_url())
        .header(header::ACCEPT, "application/json")
        .json(request)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(format!("Backend error: {} {}", status.as_u16(), text));
    }

    let result = response.json::<JsonValue>().await.map_err(|e| e.to_string())?;
    debug!("analysis backend returned a result");
    Ok(result)
}

async fn check_backend(services: &AppServices) -> Result<JsonValue, String> {
    let response = services
        .http
        .get(services.config.analysis_health_url())
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("Backend server is not responding ({})", response.status()));
    }

    let data = response.json::<JsonValue>().await.map_err(|e| e.to_string())?;
    Ok(data.get("status").cloned().unwrap_or(JsonValue::Null))
}

fn analyze_error(details: impl Into<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AnalyzeError::new(details)),
    )
        .into_response()
}

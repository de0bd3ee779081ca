//! Question memory: remember questions and find similar past ones.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::{error, info};

use medrelay_infra::{NewMemory, SIMILAR_LIMIT, SIMILARITY_THRESHOLD, SimilarQuestion};

use crate::app::dto::{RecallQuery, RecallResponse, RememberRequest, RememberResponse};
use crate::app::errors::json_error;
use crate::app::services::AppServices;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new().route("/memory", post(remember).get(recall))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/memory
///
/// Body: `{question}`. Stores the question with its summary and embedding.
pub async fn remember(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<RememberRequest>, JsonRejection>,
) -> Response {
    let question = match body {
        Ok(Json(RememberRequest { question: Some(q) })) if !q.trim().is_empty() => q,
        _ => return json_error(StatusCode::BAD_REQUEST, None, "Question is required"),
    };

    match store_question(&services, question).await {
        Ok(summary) => Json(RememberResponse::stored(summary)).into_response(),
        Err(err) => {
            error!(error = %err, "failed to store memory");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, None, "Failed to store memory")
        }
    }
}

/// GET /api/memory?query=...
///
/// Up to five remembered questions with similarity above 0.8, closest first.
pub async fn recall(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<RecallQuery>,
) -> Response {
    let query = match params.query.as_deref().filter(|q| !q.trim().is_empty()) {
        Some(query) => query,
        None => return json_error(StatusCode::BAD_REQUEST, None, "Query parameter is required"),
    };

    match similar_questions(&services, query).await {
        Ok(memories) => Json(RecallResponse::found(memories)).into_response(),
        Err(err) => {
            error!(error = %err, "failed to retrieve memories");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, None, "Failed to retrieve memories")
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn store_question(services: &AppServices, question: String) -> anyhow::Result<String> {
    let (summary, embedding) = tokio::try_join!(
        services.analyzer.summarize(&question),
        services.analyzer.embed(&question),
    )?;

    let id = services
        .memory
        .remember(NewMemory {
            question,
            question_summary: summary.clone(),
            embedding,
        })
        .await?;
    info!(memory_id = %id, "memory stored");
    Ok(summary)
}

async fn similar_questions(
    services: &AppServices,
    query: &str,
) -> anyhow::Result<Vec<SimilarQuestion>> {
    let embedding = services.analyzer.embed(query).await?;
    let memories = services
        .memory
        .similar(&embedding, SIMILARITY_THRESHOLD, SIMILAR_LIMIT)
        .await?;
    Ok(memories)
}

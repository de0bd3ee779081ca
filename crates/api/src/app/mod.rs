//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: outbound clients, the feedback store and question memory
//! - `analyzer.rs`: embeddings and summaries for question memory
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use medrelay_infra::{FeedbackStore, MemoryStore};

use crate::config::ApiConfig;

pub mod analyzer;
pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Connects to Postgres when `DATABASE_URL` is configured.
pub async fn build_app(config: ApiConfig) -> anyhow::Result<Router> {
    let services = services::build_services(config).await?;
    Ok(router_with(services))
}

/// Build the router around explicit stores (tests, embedding).
pub fn build_app_with_stores(
    config: ApiConfig,
    feedback: Arc<dyn FeedbackStore>,
    memory: Arc<dyn MemoryStore>,
) -> anyhow::Result<Router> {
    let services = services::AppServices::new(config, feedback, memory)?;
    Ok(router_with(services))
}

fn router_with(services: services::AppServices) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", routes::router())
        .layer(ServiceBuilder::new().layer(Extension(Arc::new(services))))
}

//! Outbound clients and persistence shared by the handlers.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use medrelay_infra::{
    FeedbackStore, InMemoryFeedbackStore, InMemoryMemoryStore, MemoryStore,
    PostgresFeedbackStore, PostgresMemoryStore, RetryingFeedbackStore,
};
use medrelay_stream::RelayPipeline;

use crate::app::analyzer::{OpenAiAnalyzer, QuestionAnalyzer};
use crate::config::ApiConfig;

/// Everything a handler needs, shared behind an `Arc`.
pub struct AppServices {
    pub config: ApiConfig,
    /// Client for the chat and analysis backends, bounded by the upstream timeout.
    pub http: reqwest::Client,
    pub relay: RelayPipeline,
    /// Feedback store with bounded retry already applied.
    pub feedback: Arc<dyn FeedbackStore>,
    pub memory: Arc<dyn MemoryStore>,
    pub analyzer: Arc<dyn QuestionAnalyzer>,
}

impl AppServices {
    pub fn new(
        config: ApiConfig,
        feedback: Arc<dyn FeedbackStore>,
        memory: Arc<dyn MemoryStore>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let feedback: Arc<dyn FeedbackStore> = Arc::new(RetryingFeedbackStore::with_policy(
            feedback,
            config.feedback_retry.clone(),
        ));

        if config.memory_api_key.is_none() {
            warn!("OPENAI_API_KEY not set; memory API requests are sent without credentials");
        }
        let analyzer: Arc<dyn QuestionAnalyzer> = Arc::new(OpenAiAnalyzer::new(
            http.clone(),
            config.memory_api_url.clone(),
            config.memory_api_key.clone(),
        ));

        Ok(Self {
            config,
            http,
            relay: RelayPipeline::new(),
            feedback,
            memory,
            analyzer,
        })
    }
}

/// Wire services from configuration.
pub async fn build_services(config: ApiConfig) -> anyhow::Result<AppServices> {
    let (feedback, memory): (Arc<dyn FeedbackStore>, Arc<dyn MemoryStore>) =
        match config.database_url.as_deref() {
            Some(url) => {
                let store = PostgresFeedbackStore::connect(url)
                    .await
                    .context("failed to connect to Postgres")?;
                store
                    .ensure_schema()
                    .await
                    .context("failed to prepare message_feedback table")?;
                info!("feedback store: postgres");

                let memory = PostgresMemoryStore::new(store.pool().clone());
                let memory: Arc<dyn MemoryStore> = match memory.ensure_schema().await {
                    Ok(()) => {
                        info!("question memory: postgres");
                        Arc::new(memory)
                    }
                    Err(err) => {
                        warn!(error = %err, "pgvector unavailable; question memory is kept in memory");
                        Arc::new(InMemoryMemoryStore::new())
                    }
                };
                (Arc::new(store), memory)
            }
            None => {
                warn!("DATABASE_URL not set; feedback and question memory are kept in memory and lost on restart");
                (
                    Arc::new(InMemoryFeedbackStore::new()),
                    Arc::new(InMemoryMemoryStore::new()),
                )
            }
        };

    AppServices::new(config, feedback, memory)
}

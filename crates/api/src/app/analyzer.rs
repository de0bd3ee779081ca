//! Question analysis over an OpenAI-compatible API.
//!
//! Question memory needs two things for every question: an embedding vector
//! and a one-line summary. [`QuestionAnalyzer`] is the seam; [`OpenAiAnalyzer`]
//! calls `/embeddings` and `/chat/completions` under a configurable base url.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const SUMMARY_MODEL: &str = "gpt-4o-mini";

const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise summaries.";

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analysis request failed: {0}")]
    Transport(String),
    #[error("analysis API returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("analysis API response is unusable: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait QuestionAnalyzer: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AnalyzerError>;

    /// A short summary; the question itself when the model returns nothing.
    async fn summarize(&self, text: &str) -> Result<String, AnalyzerError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct OpenAiAnalyzer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiAnalyzer {
    /// `base_url` already carries the version segment, e.g. `https://api.openai.com/v1`.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, AnalyzerError> {
        let mut request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AnalyzerError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl QuestionAnalyzer for OpenAiAnalyzer {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AnalyzerError> {
        let response: EmbeddingResponse = self
            .post(
                "/embeddings",
                &EmbeddingRequest {
                    model: EMBEDDING_MODEL,
                    input: text,
                },
            )
            .await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AnalyzerError::InvalidResponse("no embedding returned".to_string()))?;
        debug!(dimensions = embedding.len(), "question embedded");
        Ok(embedding)
    }

    async fn summarize(&self, text: &str) -> Result<String, AnalyzerError> {
        let request = ChatRequest {
            model: SUMMARY_MODEL,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(format!("Summarize this question: \"{text}\"")),
                },
            ],
        };
        let response: ChatResponse = self.post("/chat/completions", &request).await?;

        let summary = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AnalyzerError::InvalidResponse("no choices returned".to_string()))?
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| text.to_string());
        Ok(summary)
    }
}

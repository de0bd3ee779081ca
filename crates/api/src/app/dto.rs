//! Request/response DTOs.

use serde::{Deserialize, Serialize};

use medrelay_infra::{SimilarQuestion, StoredFeedback};

/// Persona used when a chat request does not name one.
pub const DEFAULT_PERSONA: &str = "general_med";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
}

impl ChatRequest {
    /// The query, if present and not blank.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.trim().is_empty())
    }

    pub fn persona(&self) -> &str {
        self.persona
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PERSONA)
    }
}

/// Body forwarded to the chat backend.
#[derive(Debug, Clone, Serialize)]
pub struct ChatUpstreamRequest<'a> {
    pub query: &'a str,
    pub persona: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub data: StoredFeedback,
}

impl FeedbackResponse {
    pub fn stored(data: StoredFeedback) -> Self {
        Self {
            status: "success",
            message: "Feedback stored successfully",
            data,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RememberRequest {
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecallQuery {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RememberResponse {
    pub status: &'static str,
    pub summary: String,
    pub message: &'static str,
}

impl RememberResponse {
    pub fn stored(summary: String) -> Self {
        Self {
            status: "success",
            summary,
            message: "Memory stored successfully",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallResponse {
    pub status: &'static str,
    pub memories: Vec<SimilarQuestion>,
}

impl RecallResponse {
    pub fn found(memories: Vec<SimilarQuestion>) -> Self {
        Self {
            status: "success",
            memories,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeError {
    pub error: &'static str,
    pub details: String,
}

impl AnalyzeError {
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            error: "Failed to analyze image",
            details: details.into(),
        }
    }
}

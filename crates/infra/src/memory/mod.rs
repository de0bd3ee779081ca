//! Question memory.
//!
//! Every question asked is kept with a short summary and an embedding vector.
//! A later question is matched against them by cosine similarity, so the
//! chat surface can point at similar questions that were asked before.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryMemoryStore;
pub use postgres::PostgresMemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Matches must be strictly more similar than this.
pub const SIMILARITY_THRESHOLD: f32 = 0.8;
/// Most matches returned by one lookup.
pub const SIMILAR_LIMIT: usize = 5;

/// A question about to be remembered.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    pub question: String,
    pub question_summary: String,
    pub embedding: Vec<f32>,
}

/// A remembered question that matched a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarQuestion {
    pub id: Uuid,
    pub question: String,
    pub question_summary: String,
    pub timestamp: DateTime<Utc>,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("embedding is unusable: {0}")]
    InvalidEmbedding(String),
    #[error("database connection timed out: {0}")]
    Timeout(String),
    #[error("could not connect to database: {0}")]
    ConnectionRefused(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Similarity-searchable question storage.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    async fn remember(&self, memory: NewMemory) -> Result<Uuid, MemoryStoreError>;

    /// Up to `limit` questions whose similarity to `embedding` exceeds
    /// `threshold`, most similar first.
    async fn similar(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarQuestion>, MemoryStoreError>;
}

#[async_trait::async_trait]
impl<S: MemoryStore + ?Sized> MemoryStore for std::sync::Arc<S> {
    async fn remember(&self, memory: NewMemory) -> Result<Uuid, MemoryStoreError> {
        (**self).remember(memory).await
    }

    async fn similar(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarQuestion>, MemoryStoreError> {
        (**self).similar(embedding, threshold, limit).await
    }
}

/// Cosine similarity of two vectors; `None` when their lengths differ or
/// either has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

/// Reject vectors no store can index.
pub(crate) fn validate_embedding(embedding: &[f32]) -> Result<(), MemoryStoreError> {
    if embedding.is_empty() {
        return Err(MemoryStoreError::InvalidEmbedding("empty vector".to_string()));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(MemoryStoreError::InvalidEmbedding(
            "non-finite component".to_string(),
        ));
    }
    Ok(())
}

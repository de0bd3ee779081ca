use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{MemoryStore, MemoryStoreError, NewMemory, SimilarQuestion, cosine_similarity, validate_embedding};

#[derive(Debug, Clone)]
struct Row {
    id: Uuid,
    question: String,
    question_summary: String,
    embedding: Vec<f32>,
    timestamp: DateTime<Utc>,
}

/// In-memory question memory for tests/dev. Lookups scan every row.
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    rows: RwLock<Vec<Row>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn remember(&self, memory: NewMemory) -> Result<Uuid, MemoryStoreError> {
        validate_embedding(&memory.embedding)?;
        let id = Uuid::now_v7();
        let mut rows = self
            .rows
            .write()
            .map_err(|_| MemoryStoreError::Storage("lock poisoned".to_string()))?;
        rows.push(Row {
            id,
            question: memory.question,
            question_summary: memory.question_summary,
            embedding: memory.embedding,
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn similar(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarQuestion>, MemoryStoreError> {
        validate_embedding(embedding)?;
        let rows = self
            .rows
            .read()
            .map_err(|_| MemoryStoreError::Storage("lock poisoned".to_string()))?;

        let mut matches: Vec<SimilarQuestion> = rows
            .iter()
            .filter_map(|row| {
                let similarity = cosine_similarity(&row.embedding, embedding)?;
                (similarity > threshold).then(|| SimilarQuestion {
                    id: row.id,
                    question: row.question.clone(),
                    question_summary: row.question_summary.clone(),
                    timestamp: row.timestamp,
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{SIMILAR_LIMIT, SIMILARITY_THRESHOLD};

    fn memory(question: &str, embedding: Vec<f32>) -> NewMemory {
        NewMemory {
            question: question.to_string(),
            question_summary: format!("about {question}"),
            embedding,
        }
    }

    #[tokio::test]
    async fn returns_close_matches_most_similar_first() {
        let store = InMemoryMemoryStore::new();
        store.remember(memory("dose", vec![1.0, 0.0, 0.0])).await.unwrap();
        store.remember(memory("dose for kids", vec![0.9, 0.3, 0.0])).await.unwrap();
        store.remember(memory("side effects", vec![0.0, 1.0, 0.0])).await.unwrap();

        let found = store
            .similar(&[1.0, 0.1, 0.0], SIMILARITY_THRESHOLD, SIMILAR_LIMIT)
            .await
            .unwrap();

        let questions: Vec<&str> = found.iter().map(|m| m.question.as_str()).collect();
        assert_eq!(questions, vec!["dose", "dose for kids"]);
        assert!(found[0].similarity >= found[1].similarity);
        assert!(found.iter().all(|m| m.similarity > SIMILARITY_THRESHOLD));
    }

    #[tokio::test]
    async fn limit_caps_the_result() {
        let store = InMemoryMemoryStore::new();
        for i in 0..8 {
            store
                .remember(memory(&format!("q{i}"), vec![1.0, i as f32 * 0.01]))
                .await
                .unwrap();
        }

        let found = store.similar(&[1.0, 0.0], SIMILARITY_THRESHOLD, SIMILAR_LIMIT).await.unwrap();
        assert_eq!(found.len(), SIMILAR_LIMIT);
        assert_eq!(found[0].question, "q0");
    }

    #[tokio::test]
    async fn vectors_of_another_dimension_never_match() {
        let store = InMemoryMemoryStore::new();
        store.remember(memory("old model", vec![1.0, 0.0])).await.unwrap();

        let found = store.similar(&[1.0, 0.0, 0.0], 0.0, SIMILAR_LIMIT).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn unusable_embeddings_are_rejected() {
        let store = InMemoryMemoryStore::new();
        let err = store.remember(memory("q", vec![])).await.unwrap_err();
        assert!(matches!(err, MemoryStoreError::InvalidEmbedding(_)));
        assert!(store.is_empty());
    }
}

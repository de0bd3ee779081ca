//! Postgres question memory on the `pgvector` extension.
//!
//! Embeddings are bound as vector text literals (`[0.1,0.2]`) and cast in SQL,
//! so no vector codec is needed on the client side. Similarity is
//! `1 - cosine distance` (the `<=>` operator).

use std::fmt::Write as _;
use std::io::ErrorKind;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use super::{MemoryStore, MemoryStoreError, NewMemory, SimilarQuestion, validate_embedding};

/// Dimension of `text-embedding-ada-002` vectors.
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// Postgres question memory over the `chat_memory` table.
#[derive(Debug, Clone)]
pub struct PostgresMemoryStore {
    pool: PgPool,
    dimensions: usize,
}

impl PostgresMemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            dimensions: DEFAULT_DIMENSIONS,
        }
    }

    /// Enable `pgvector` and create the table if needed.
    pub async fn ensure_schema(&self) -> Result<(), MemoryStoreError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_extension", e))?;

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS chat_memory (
                id                  UUID PRIMARY KEY,
                question            TEXT NOT NULL,
                question_summary    TEXT NOT NULL,
                question_embedding  vector({}) NOT NULL,
                timestamp           TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            self.dimensions
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<(), MemoryStoreError> {
        validate_embedding(embedding)?;
        if embedding.len() != self.dimensions {
            return Err(MemoryStoreError::InvalidEmbedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MemoryStore for PostgresMemoryStore {
    #[instrument(skip(self, memory), fields(question_len = memory.question.len()))]
    async fn remember(&self, memory: NewMemory) -> Result<Uuid, MemoryStoreError> {
        self.check_dimensions(&memory.embedding)?;
        let id = Uuid::now_v7();

        sqlx::query(
            r#"
            INSERT INTO chat_memory (id, question, question_summary, question_embedding)
            VALUES ($1, $2, $3, $4::text::vector)
            "#,
        )
        .bind(id)
        .bind(&memory.question)
        .bind(&memory.question_summary)
        .bind(vector_literal(&memory.embedding))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_memory", e))?;

        Ok(id)
    }

    #[instrument(skip(self, embedding))]
    async fn similar(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarQuestion>, MemoryStoreError> {
        self.check_dimensions(embedding)?;

        let rows = sqlx::query(
            r#"
            SELECT id, question, question_summary, timestamp,
                   1 - (question_embedding <=> $1::text::vector) AS similarity
            FROM chat_memory
            WHERE 1 - (question_embedding <=> $1::text::vector) > $2
            ORDER BY similarity DESC
            LIMIT $3
            "#,
        )
        .bind(vector_literal(embedding))
        .bind(f64::from(threshold))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("similar_questions", e))?;

        rows.iter().map(decode_row).collect()
    }
}

/// `pgvector` text form of a vector.
fn vector_literal(embedding: &[f32]) -> String {
    let mut out = String::with_capacity(embedding.len() * 12 + 2);
    out.push('[');
    for (i, value) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{value}");
    }
    out.push(']');
    out
}

fn decode_row(row: &PgRow) -> Result<SimilarQuestion, MemoryStoreError> {
    let decode = |e| map_sqlx_error("decode_memory", e);
    let similarity: f64 = row.try_get("similarity").map_err(decode)?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp").map_err(decode)?;
    Ok(SimilarQuestion {
        id: row.try_get("id").map_err(decode)?,
        question: row.try_get("question").map_err(decode)?,
        question_summary: row.try_get("question_summary").map_err(decode)?,
        timestamp,
        similarity: similarity as f32,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> MemoryStoreError {
    match err {
        sqlx::Error::Database(db_err) => MemoryStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolTimedOut => {
            MemoryStoreError::Timeout(format!("pool timed out in {}", operation))
        }
        sqlx::Error::Io(io) => {
            let msg = format!("io error in {}: {}", operation, io);
            match io.kind() {
                ErrorKind::ConnectionRefused => MemoryStoreError::ConnectionRefused(msg),
                ErrorKind::TimedOut => MemoryStoreError::Timeout(msg),
                _ => MemoryStoreError::Storage(msg),
            }
        }
        other => MemoryStoreError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}

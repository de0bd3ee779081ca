//! Postgres-backed feedback store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | FeedbackStoreError |
//! |------------|----------------------|--------------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (not-null violation) | `23502` | `MissingField` |
//! | Database (other) | Any other | `Storage { code }` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | Io (connection refused) | N/A | `ConnectionRefused` |
//! | Io (timed out) | N/A | `Timeout` |
//! | Other | N/A | `Storage` |

use std::io::ErrorKind;
use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use medrelay_core::MessageId;

use super::{FeedbackRecord, FeedbackStore, FeedbackStoreError, StoredFeedback};

/// Postgres feedback store over the `message_feedback` table.
#[derive(Debug, Clone)]
pub struct PostgresFeedbackStore {
    pool: PgPool,
}

impl PostgresFeedbackStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small pool with a short acquire timeout.
    pub async fn connect(database_url: &str) -> Result<Self, FeedbackStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), FeedbackStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_feedback (
                id               BIGSERIAL PRIMARY KEY,
                message_id       TEXT NOT NULL UNIQUE,
                feedback         SMALLINT NOT NULL,
                message_content  TEXT,
                timestamp        TIMESTAMPTZ,
                created_at       TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at       TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FeedbackStore for PostgresFeedbackStore {
    #[instrument(skip(self, record), fields(message_id = %record.message_id, row_id = tracing::field::Empty))]
    async fn upsert(&self, record: &FeedbackRecord) -> Result<StoredFeedback, FeedbackStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            INSERT INTO message_feedback (message_id, feedback, message_content, timestamp)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id)
            DO UPDATE SET
                feedback = EXCLUDED.feedback,
                updated_at = CURRENT_TIMESTAMP
            RETURNING id, feedback
            "#,
        )
        .bind(record.message_id.as_str())
        .bind(record.feedback)
        .bind(&record.message_content)
        .bind(record.timestamp)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_feedback", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        let stored = decode_row(&row)?;
        Span::current().record("row_id", stored.id);
        Ok(stored)
    }

    #[instrument(skip(self), fields(message_id = %message_id))]
    async fn get(&self, message_id: &MessageId) -> Result<Option<StoredFeedback>, FeedbackStoreError> {
        let row = sqlx::query("SELECT id, feedback FROM message_feedback WHERE message_id = $1")
            .bind(message_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_feedback", e))?;

        row.as_ref().map(decode_row).transpose()
    }
}

fn decode_row(row: &PgRow) -> Result<StoredFeedback, FeedbackStoreError> {
    Ok(StoredFeedback {
        id: row
            .try_get("id")
            .map_err(|e| map_sqlx_error("decode_id", e))?,
        feedback: row
            .try_get("feedback")
            .map_err(|e| map_sqlx_error("decode_feedback", e))?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> FeedbackStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) => FeedbackStoreError::from_code(code.as_ref(), msg),
                None => FeedbackStoreError::storage(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            FeedbackStoreError::Timeout(format!("pool timed out in {}", operation))
        }
        sqlx::Error::Io(io) => map_io_error(operation, &io),
        sqlx::Error::PoolClosed => {
            FeedbackStoreError::storage(format!("connection pool closed in {}", operation))
        }
        other => FeedbackStoreError::storage(format!("sqlx error in {}: {}", operation, other)),
    }
}

fn map_io_error(operation: &str, io: &std::io::Error) -> FeedbackStoreError {
    let msg = format!("io error in {}: {}", operation, io);
    match io.kind() {
        ErrorKind::ConnectionRefused => FeedbackStoreError::ConnectionRefused(msg),
        ErrorKind::TimedOut => FeedbackStoreError::Timeout(msg),
        _ => FeedbackStoreError::storage(msg),
    }
}

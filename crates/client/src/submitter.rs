//! HTTP job submission.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use medrelay_core::DeliveryError;
use medrelay_queue::{JobHandler, PendingJob};

/// Posts each job's payload as JSON to a fixed endpoint.
///
/// | Outcome | Result |
/// |---------|--------|
/// | 2xx | response JSON (`null` for an empty body) |
/// | 400, 409, 422 | `ValidationConflict` |
/// | other status | `TransientNetwork` |
/// | timeout, refused or reset connection | `TransientNetwork` |
/// | payload cannot be serialized | `Encoding` |
#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    client: reqwest::Client,
    url: String,
}

impl HttpSubmitter {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<P> JobHandler<P> for HttpSubmitter
where
    P: Serialize + Send + Sync + 'static,
{
    type Output = JsonValue;

    async fn submit(&self, job: &PendingJob<P>) -> Result<JsonValue, DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(&job.payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        debug!(job_id = %job.id, attempt = job.attempt, status = status.as_u16(), url = %self.url, "submission answered");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_http_status(status.as_u16(), body));
        }

        let body = response.bytes().await.map_err(classify_transport)?;
        if body.is_empty() {
            return Ok(JsonValue::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| DeliveryError::encoding(format!("invalid response body: {e}")))
    }
}

fn classify_transport(err: reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::encoding(err.to_string())
    } else if err.is_timeout() {
        DeliveryError::transient(format!("request timed out: {err}"))
    } else if err.is_connect() {
        DeliveryError::transient(format!("connection failed: {err}"))
    } else {
        DeliveryError::transient(err.to_string())
    }
}

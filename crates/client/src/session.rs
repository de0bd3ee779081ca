//! Client session: queues, host activity and notifications.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use medrelay_core::JobId;
use medrelay_queue::{HostActivity, JobHandler, JobQueue, LifecycleResumer, QueueConfig, RetryPolicy};

use crate::notification::{JobKind, Notification};
use crate::submitter::HttpSubmitter;
use crate::types::{AnalysisRequest, FeedbackSubmission};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base url of the API (`/api/calculator` and `/api/feedback` are appended).
    pub api_base_url: String,
    pub analyses: QueueConfig,
    pub feedback: QueueConfig,
    /// Buffered notifications per subscriber.
    pub notification_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080".to_string(),
            analyses: QueueConfig::default().with_name("analyses"),
            feedback: QueueConfig::default().with_name("feedback"),
            notification_capacity: 64,
        }
    }
}

impl ClientConfig {
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use `retry` for both queues.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.analyses = self.analyses.with_retry(retry.clone());
        self.feedback = self.feedback.with_retry(retry);
        self
    }

    /// Use `delay` between submissions on both queues.
    pub fn with_inter_job_delay(mut self, delay: Duration) -> Self {
        self.analyses = self.analyses.with_inter_job_delay(delay);
        self.feedback = self.feedback.with_inter_job_delay(delay);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.analyses = self.analyses.with_request_timeout(timeout);
        self.feedback = self.feedback.with_request_timeout(timeout);
        self
    }

    pub fn analysis_url(&self) -> String {
        format!("{}/api/calculator", self.api_base_url)
    }

    pub fn feedback_url(&self) -> String {
        format!("{}/api/feedback", self.api_base_url)
    }
}

/// The client side of the system.
///
/// Submissions return a [`JobId`] immediately; their outcome arrives later as
/// a [`Notification`]. Report host transitions through [`activity`]: while
/// suspended both queues stop claiming work, and activation restarts any
/// queue that still has jobs.
///
/// Must be created inside a tokio runtime. Dropping the session pauses both
/// queues and stops its background tasks: a job already in flight finishes,
/// jobs still waiting are never sent.
///
/// [`activity`]: ClientSession::activity
pub struct ClientSession {
    analyses: JobQueue<AnalysisRequest, HttpSubmitter>,
    feedback: JobQueue<FeedbackSubmission, HttpSubmitter>,
    activity: HostActivity,
    notifications: broadcast::Sender<Notification>,
    _resumers: [LifecycleResumer; 2],
    forwarders: [JoinHandle<()>; 2],
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(config, http))
    }

    /// Build a session around an existing HTTP client.
    pub fn with_client(config: ClientConfig, http: reqwest::Client) -> Self {
        let analyses = JobQueue::new(
            HttpSubmitter::new(http.clone(), config.analysis_url()),
            config.analyses.clone(),
        );
        let feedback = JobQueue::new(
            HttpSubmitter::new(http, config.feedback_url()),
            config.feedback.clone(),
        );

        let activity = HostActivity::new();
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));

        let resumers = [
            LifecycleResumer::spawn(analyses.clone(), &activity),
            LifecycleResumer::spawn(feedback.clone(), &activity),
        ];
        let forwarders = [
            forward_notifications(&analyses, JobKind::Analysis, notifications.clone()),
            forward_notifications(&feedback, JobKind::Feedback, notifications.clone()),
        ];

        info!(api = %config.api_base_url, "client session started");
        Self {
            analyses,
            feedback,
            activity,
            notifications,
            _resumers: resumers,
            forwarders,
        }
    }

    /// Queue an image for analysis.
    pub fn submit_analysis(&self, image: impl Into<String>) -> JobId {
        self.analyses.enqueue(AnalysisRequest::new(image))
    }

    /// Queue a feedback vote.
    pub fn submit_feedback(&self, submission: FeedbackSubmission) -> JobId {
        self.feedback.enqueue(submission)
    }

    /// Receive every notification published after this call.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// The host activity signal driving both queues.
    pub fn activity(&self) -> &HostActivity {
        &self.activity
    }

    pub fn analyses(&self) -> &JobQueue<AnalysisRequest, HttpSubmitter> {
        &self.analyses
    }

    pub fn feedback(&self) -> &JobQueue<FeedbackSubmission, HttpSubmitter> {
        &self.feedback
    }

    /// Jobs waiting across both queues.
    pub fn pending(&self) -> usize {
        self.analyses.len() + self.feedback.len()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.analyses.pause();
        self.feedback.pause();
        for task in &self.forwarders {
            task.abort();
        }
    }
}

fn forward_notifications<P, H>(
    queue: &JobQueue<P, H>,
    kind: JobKind,
    tx: broadcast::Sender<Notification>,
) -> JoinHandle<()>
where
    P: Clone + Send + Sync + 'static,
    H: JobHandler<P>,
{
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(notification) = Notification::from_event(kind, &event) {
                        debug!(job_id = %notification.job_id, kind = ?kind, level = ?notification.level, "notification");
                        // Err only means nobody is listening.
                        let _ = tx.send(notification);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(kind = ?kind, skipped, "notification forwarder lagged behind job events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

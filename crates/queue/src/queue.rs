//! Single-flight job queue.
//!
//! Jobs are processed strictly one at a time in insertion order. A failed job
//! that still has tries left is re-inserted at the back, behind everything
//! queued before it failed. At most one drain loop runs per queue; the
//! `draining` flag lives under the same lock as the pending jobs, so an
//! enqueue can never slip in between "queue is empty" and "loop stopped".

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Notify, broadcast};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use medrelay_core::{DeliveryError, JobId};

use crate::job::{FailureReason, JobEvent, PendingJob};
use crate::retry::{RetryDecision, RetryPolicy};

/// Performs the outbound operation for one job.
#[async_trait]
pub trait JobHandler<P: Send + Sync + 'static>: Send + Sync + 'static {
    type Output: Clone + Send + 'static;

    async fn submit(&self, job: &PendingJob<P>) -> Result<Self::Output, DeliveryError>;
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name for logging
    pub name: String,
    pub retry: RetryPolicy,
    /// Hard bound on a single submission; expiry is a transient failure.
    pub request_timeout: Duration,
    /// Pause between two submissions of the same drain loop.
    pub inter_job_delay: Duration,
    /// Buffered events per subscriber before a slow one starts lagging.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "job-queue".to_string(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(300),
            inter_job_delay: Duration::from_millis(100),
            event_capacity: 64,
        }
    }
}

impl QueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_inter_job_delay(mut self, delay: Duration) -> Self {
        self.inter_job_delay = delay;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    /// Submissions made, retries included.
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
}

impl DrainStats {
    fn record(&mut self, tally: Tally) {
        self.processed += 1;
        match tally {
            Tally::Succeeded => self.succeeded += 1,
            Tally::Retried => self.retried += 1,
            Tally::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tally {
    Succeeded,
    Retried,
    Failed,
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone)]
pub struct QueueSnapshot<P> {
    /// Waiting jobs in processing order.
    pub pending: Vec<PendingJob<P>>,
    pub in_flight: Option<JobId>,
    pub draining: bool,
    pub paused: bool,
}

struct Entry<P> {
    job: PendingJob<P>,
    /// Earliest instant the job may be submitted (retry backoff).
    ready_at: Instant,
}

/// The claimed job, kept until it settles so a cancelled loop can requeue it.
struct InFlight<P> {
    job: PendingJob<P>,
    task: Option<AbortHandle>,
}

struct QueueState<P> {
    pending: VecDeque<Entry<P>>,
    in_flight: Option<InFlight<P>>,
    draining: bool,
    paused: bool,
    stats: DrainStats,
}

enum Claim<P> {
    Job(PendingJob<P>),
    WaitUntil(Instant),
    Stop,
}

impl<P: Clone> QueueState<P> {
    /// Take the oldest job that is ready at `now`.
    ///
    /// Clears `draining` when returning [`Claim::Stop`]; the caller's loop
    /// must exit.
    fn claim(&mut self, now: Instant) -> Claim<P> {
        if self.paused || self.pending.is_empty() {
            self.draining = false;
            return Claim::Stop;
        }

        match self.pending.iter().position(|e| e.ready_at <= now) {
            Some(index) => match self.pending.remove(index) {
                Some(entry) => {
                    self.in_flight = Some(InFlight {
                        job: entry.job.clone(),
                        task: None,
                    });
                    Claim::Job(entry.job)
                }
                None => Claim::WaitUntil(now),
            },
            None => {
                let earliest = self
                    .pending
                    .iter()
                    .map(|e| e.ready_at)
                    .min()
                    .unwrap_or(now);
                Claim::WaitUntil(earliest)
            }
        }
    }
}

impl<P> QueueState<P> {
    fn in_flight_id(&self) -> Option<JobId> {
        self.in_flight.as_ref().map(|f| f.job.id)
    }
}

/// `now + delay`, saturating at a far-future instant.
fn ready_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct Shared<P, H: JobHandler<P>>
where
    P: Send + Sync + 'static,
{
    handler: H,
    config: QueueConfig,
    state: Mutex<QueueState<P>>,
    events: broadcast::Sender<JobEvent<P, H::Output>>,
    wake: Notify,
}

/// Ordered single-flight job queue.
///
/// This struct is cheap to clone and is safe to share across threads; clones
/// refer to the same queue.
pub struct JobQueue<P, H>
where
    P: Clone + Send + Sync + 'static,
    H: JobHandler<P>,
{
    inner: Arc<Shared<P, H>>,
}

impl<P, H> Clone for JobQueue<P, H>
where
    P: Clone + Send + Sync + 'static,
    H: JobHandler<P>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, H> fmt::Debug for JobQueue<P, H>
where
    P: Clone + Send + Sync + 'static,
    H: JobHandler<P>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("JobQueue")
            .field("name", &self.inner.config.name)
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight_id())
            .field("draining", &state.draining)
            .finish()
    }
}

impl<P, H> JobQueue<P, H>
where
    P: Clone + Send + Sync + 'static,
    H: JobHandler<P>,
{
    pub fn new(handler: H, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Shared {
                handler,
                config,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    in_flight: None,
                    draining: false,
                    paused: false,
                    stats: DrainStats::default(),
                }),
                events,
                wake: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Queue a payload and return its id immediately.
    ///
    /// Starts a drain loop in the background unless one is already running or
    /// the queue is paused. The outcome is published through [`subscribe`].
    ///
    /// [`subscribe`]: JobQueue::subscribe
    pub fn enqueue(&self, payload: P) -> JobId {
        let job = PendingJob::new(payload);
        let id = job.id;
        self.state().pending.push_back(Entry {
            job,
            ready_at: Instant::now(),
        });

        debug!(queue = %self.inner.config.name, job_id = %id, "job enqueued");
        self.publish(JobEvent::Enqueued { id });
        self.inner.wake.notify_one();
        self.spawn_drain();
        id
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent<P, H::Output>> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> QueueSnapshot<P> {
        let state = self.state();
        QueueSnapshot {
            pending: state.pending.iter().map(|e| e.job.clone()).collect(),
            in_flight: state.in_flight_id(),
            draining: state.draining,
            paused: state.paused,
        }
    }

    /// Number of jobs waiting, not counting the one in flight.
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.state().draining
    }

    /// Counters accumulated over every drain loop of this queue.
    pub fn stats(&self) -> DrainStats {
        self.state().stats
    }

    /// Stop claiming new jobs. The job in flight, if any, still completes.
    pub fn pause(&self) {
        self.state().paused = true;
        self.inner.wake.notify_one();
        debug!(queue = %self.inner.config.name, "queue paused");
    }

    /// Lift a pause and start a drain loop if there is work and none is active.
    ///
    /// Returns whether a new loop was started. Safe to call at any time.
    pub fn resume(&self) -> bool {
        self.state().paused = false;
        self.spawn_drain()
    }

    /// Run a drain loop on the current task until the queue is empty.
    ///
    /// Returns `None` without touching the queue if a loop is already active.
    pub async fn drain(&self) -> Option<DrainStats> {
        {
            let mut state = self.state();
            if state.draining {
                debug!(queue = %self.inner.config.name, "drain already active");
                return None;
            }
            state.draining = true;
        }
        Some(self.run_drain().await)
    }

    fn spawn_drain(&self) -> bool {
        {
            let mut state = self.state();
            if state.draining || state.paused || state.pending.is_empty() {
                return false;
            }
            state.draining = true;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.state().draining = false;
            warn!(queue = %self.inner.config.name, "no async runtime; jobs stay queued until resumed");
            return false;
        };

        let queue = self.clone();
        runtime.spawn(async move {
            queue.run_drain().await;
        });
        true
    }

    /// The loop body. The caller has already set `draining`.
    async fn run_drain(&self) -> DrainStats {
        let name = &self.inner.config.name;
        let mut guard = DrainGuard {
            queue: self,
            finished: false,
        };
        let mut run = DrainStats::default();
        info!(queue = %name, pending = self.len(), "drain loop started");

        loop {
            let claim = self.state().claim(Instant::now());
            match claim {
                Claim::Job(job) => {
                    self.process(job, &mut run).await;
                    let delay = self.inner.config.inter_job_delay;
                    if !delay.is_zero() && !self.is_empty() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Claim::WaitUntil(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.inner.wake.notified() => {}
                    }
                }
                Claim::Stop => break,
            }
        }

        guard.finished = true;
        info!(
            queue = %name,
            processed = run.processed,
            succeeded = run.succeeded,
            retried = run.retried,
            failed = run.failed,
            "drain loop finished"
        );
        run
    }

    async fn process(&self, job: PendingJob<P>, run: &mut DrainStats) {
        let name = &self.inner.config.name;
        let id = job.id;
        let attempt = job.attempt;

        info!(queue = %name, job_id = %id, attempt, "submitting job");
        self.publish(JobEvent::Started { id, attempt });

        let result = self.submit(job.clone()).await;

        let event = match result {
            Ok(output) => {
                info!(queue = %name, job_id = %id, attempt, "job succeeded");
                self.settle(run, Tally::Succeeded, None);
                JobEvent::Succeeded { job, output }
            }
            Err(error) => match self.inner.config.retry.decide(attempt, &error) {
                RetryDecision::Retry {
                    next_attempt,
                    delay,
                } => {
                    warn!(
                        queue = %name,
                        job_id = %id,
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "job failed; requeued"
                    );
                    let entry = Entry {
                        job: job.retried(),
                        ready_at: ready_after(delay),
                    };
                    self.settle(run, Tally::Retried, Some(entry));
                    JobEvent::Retrying {
                        id,
                        next_attempt,
                        error,
                    }
                }
                RetryDecision::GiveUp(reason) => {
                    match reason {
                        FailureReason::Exhausted => warn!(
                            queue = %name,
                            job_id = %id,
                            attempt,
                            error = %error,
                            "job failed; retries exhausted"
                        ),
                        FailureReason::Rejected => warn!(
                            queue = %name,
                            job_id = %id,
                            attempt,
                            error = %error,
                            "job rejected; not retrying"
                        ),
                    }
                    self.settle(run, Tally::Failed, None);
                    JobEvent::Failed { job, error, reason }
                }
            },
        };

        self.publish(event);
    }

    /// Clear the in-flight slot, re-insert a retried job and count the try.
    fn settle(&self, run: &mut DrainStats, tally: Tally, requeue: Option<Entry<P>>) {
        let mut state = self.state();
        state.in_flight = None;
        if let Some(entry) = requeue {
            state.pending.push_back(entry);
        }
        state.stats.record(tally);
        run.record(tally);
    }

    /// Submit on a separate task so an expired timeout can cancel it.
    async fn submit(&self, job: PendingJob<P>) -> Result<H::Output, DeliveryError> {
        let timeout = self.inner.config.request_timeout;
        let shared = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { shared.handler.submit(&job).await });
        let abort = task.abort_handle();
        if let Some(in_flight) = self.state().in_flight.as_mut() {
            in_flight.task = Some(abort.clone());
        }

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(DeliveryError::transient(format!(
                "submission task ended abnormally: {join}"
            ))),
            Err(_) => {
                abort.abort();
                Err(DeliveryError::timeout(timeout))
            }
        }
    }

    fn publish(&self, event: JobEvent<P, H::Output>) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn state(&self) -> MutexGuard<'_, QueueState<P>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the draining flag if a drain loop is dropped mid-way.
struct DrainGuard<'a, P, H>
where
    P: Clone + Send + Sync + 'static,
    H: JobHandler<P>,
{
    queue: &'a JobQueue<P, H>,
    finished: bool,
}

impl<P, H> Drop for DrainGuard<'_, P, H>
where
    P: Clone + Send + Sync + 'static,
    H: JobHandler<P>,
{
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.queue.state();
        state.draining = false;
        if let Some(InFlight { job, task }) = state.in_flight.take() {
            if let Some(task) = task {
                task.abort();
            }
            warn!(
                queue = %self.queue.inner.config.name,
                job_id = %job.id,
                attempt = job.attempt,
                "drain loop cancelled with a job in flight; requeued at the front"
            );
            state.pending.push_front(Entry {
                job,
                ready_at: Instant::now(),
            });
        }
    }
}

//! Host activity signal and the resumer that reacts to it.
//!
//! A host (browser tab, desktop window, mobile process) may be suspended at
//! any time, and a drain loop running inside it stops making progress. When
//! the host reports that it became active again, the [`LifecycleResumer`]
//! restarts the queue if it has work and no loop is running. There is no
//! timer-driven background execution: activation is the only restart path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::queue::{JobHandler, JobQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Active,
    Suspended,
}

/// Broadcasts host activity transitions.
///
/// Cheap to clone; every clone drives the same signal. Reporting `Active`
/// twice in a row notifies subscribers twice (a focus event after a
/// visibility event, for instance).
#[derive(Debug, Clone)]
pub struct HostActivity {
    tx: Arc<watch::Sender<HostState>>,
}

impl Default for HostActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl HostActivity {
    /// A new signal, initially active.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HostState::Active);
        Self { tx: Arc::new(tx) }
    }

    pub fn became_active(&self) {
        self.tx.send_replace(HostState::Active);
    }

    pub fn suspended(&self) {
        self.tx.send_replace(HostState::Suspended);
    }

    pub fn current(&self) -> HostState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HostState> {
        self.tx.subscribe()
    }
}

/// Something a resumer can suspend and restart.
pub trait Resumable: Send + Sync + 'static {
    /// Stop starting new work.
    fn suspend(&self);

    /// Restart work if there is any and nothing is running. Returns whether
    /// anything was started; calling it again while running is a no-op.
    fn resume(&self) -> bool;
}

impl<P, H> Resumable for JobQueue<P, H>
where
    P: Clone + Send + Sync + 'static,
    H: JobHandler<P>,
{
    fn suspend(&self) {
        self.pause();
    }

    fn resume(&self) -> bool {
        JobQueue::resume(self)
    }
}

/// Binds one [`Resumable`] to a [`HostActivity`] signal.
///
/// The binding lives on a background task and ends when the resumer is
/// dropped or every `HostActivity` clone is gone. Must be created inside a
/// tokio runtime.
#[derive(Debug)]
pub struct LifecycleResumer {
    task: JoinHandle<()>,
}

impl LifecycleResumer {
    pub fn spawn<R: Resumable>(target: R, activity: &HostActivity) -> Self {
        let mut rx = activity.subscribe();
        let task = tokio::spawn(async move {
            let initial = *rx.borrow_and_update();
            if initial == HostState::Suspended {
                Self::apply(&target, initial);
            }

            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                Self::apply(&target, state);
            }
            debug!("host activity signal closed; resumer stopped");
        });
        Self { task }
    }

    /// Apply one host transition to `target`. Returns whether work was restarted.
    pub fn apply<R: Resumable + ?Sized>(target: &R, state: HostState) -> bool {
        match state {
            HostState::Active => {
                let started = target.resume();
                if started {
                    info!("host became active; restarted idle queue");
                } else {
                    debug!("host became active; nothing to restart");
                }
                started
            }
            HostState::Suspended => {
                target.suspend();
                debug!("host suspended; queue paused");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LifecycleResumer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use medrelay_core::DeliveryError;
    use tokio::sync::broadcast;

    use crate::job::{JobEvent, PendingJob};
    use crate::queue::QueueConfig;

    #[derive(Clone, Default)]
    struct Echo {
        submissions: Arc<AtomicUsize>,
        latency: Duration,
    }

    #[async_trait]
    impl JobHandler<u32> for Echo {
        type Output = u32;

        async fn submit(&self, job: &PendingJob<u32>) -> Result<u32, DeliveryError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            Ok(job.payload)
        }
    }

    fn echo_queue(latency: Duration) -> (JobQueue<u32, Echo>, Echo) {
        let handler = Echo {
            latency,
            ..Echo::default()
        };
        (JobQueue::new(handler.clone(), QueueConfig::default()), handler)
    }

    async fn settle_time() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    async fn succeeded(rx: &mut broadcast::Receiver<JobEvent<u32, u32>>, n: usize) -> Vec<u32> {
        let mut out = Vec::new();
        while out.len() < n {
            if let JobEvent::Succeeded { output, .. } = rx.recv().await.unwrap() {
                out.push(output);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn work_queued_while_suspended_runs_on_activation() {
        let activity = HostActivity::new();
        let (queue, handler) = echo_queue(Duration::from_millis(5));
        let _resumer = LifecycleResumer::spawn(queue.clone(), &activity);
        let mut rx = queue.subscribe();

        activity.suspended();
        settle_time().await;

        queue.enqueue(1);
        queue.enqueue(2);
        settle_time().await;
        assert_eq!(handler.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_draining());

        activity.became_active();
        assert_eq!(succeeded(&mut rx, 2).await, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn activation_while_draining_is_a_noop() {
        let activity = HostActivity::new();
        let (queue, handler) = echo_queue(Duration::from_secs(5));
        let _resumer = LifecycleResumer::spawn(queue.clone(), &activity);
        let mut rx = queue.subscribe();

        queue.enqueue(7);
        loop {
            if let JobEvent::Started { .. } = rx.recv().await.unwrap() {
                break;
            }
        }

        assert!(!LifecycleResumer::apply(&queue, HostState::Active));
        activity.became_active();
        activity.became_active();

        assert_eq!(succeeded(&mut rx, 1).await, vec![7]);
        settle_time().await;
        assert_eq!(handler.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn activation_with_empty_queue_starts_nothing() {
        let (queue, _) = echo_queue(Duration::ZERO);
        assert!(!LifecycleResumer::apply(&queue, HostState::Active));
        assert!(!queue.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn initially_suspended_host_pauses_the_queue() {
        let activity = HostActivity::new();
        activity.suspended();
        let (queue, _) = echo_queue(Duration::ZERO);
        let _resumer = LifecycleResumer::spawn(queue.clone(), &activity);
        settle_time().await;

        assert!(queue.snapshot().paused);
        assert_eq!(activity.current(), HostState::Suspended);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_resumer_stops_listening() {
        let activity = HostActivity::new();
        let (queue, _) = echo_queue(Duration::ZERO);
        let resumer = LifecycleResumer::spawn(queue.clone(), &activity);
        settle_time().await;
        assert!(resumer.is_running());

        drop(resumer);
        activity.suspended();
        settle_time().await;
        assert!(!queue.snapshot().paused);
    }
}

//! Hand-written test doubles for the broker and lease traits
//!
//! The mocks record every interaction so tests can assert on what was
//! published, acknowledged and rejected without a running broker.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use agent_scheduler_core::{
    settle_delivery, Acknowledger, AgentTask, ConsumerHandle, DeliveryHandler, DeliveryOutcome,
    SchedulerError, SchedulerLease, SchedulerResult, TaskBroker,
};

/// Mock implementation of TaskBroker for testing
///
/// Publishing requires `init` like the real brokers. Deliveries are driven
/// by the test through [`MockTaskBroker::deliver`].
#[derive(Default)]
pub struct MockTaskBroker {
    initialized: AtomicBool,
    fail_publish: AtomicBool,
    publish_delay: Mutex<Option<Duration>>,
    published: Mutex<Vec<AgentTask>>,
    acked: Arc<Mutex<Vec<String>>>,
    rejected: Arc<Mutex<Vec<(String, bool)>>>,
    handler: Mutex<Option<Arc<dyn DeliveryHandler>>>,
    consumers: Mutex<Vec<CancellationToken>>,
}

impl MockTaskBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that has already been initialized
    pub fn initialized() -> Self {
        let broker = Self::new();
        broker.initialized.store(true, Ordering::SeqCst);
        broker
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Every publish sleeps this long before recording the task
    pub fn set_publish_delay(&self, delay: Duration) {
        *self.publish_delay.lock().unwrap() = Some(delay);
    }

    pub fn published(&self) -> Vec<AgentTask> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_ids(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    /// Rejected delivery labels with the requeue flag that was used
    pub fn rejected(&self) -> Vec<(String, bool)> {
        self.rejected.lock().unwrap().clone()
    }

    pub fn has_consumer(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    pub fn all_consumers_stopped(&self) -> bool {
        self.consumers
            .lock()
            .unwrap()
            .iter()
            .all(CancellationToken::is_cancelled)
    }

    /// Deliver a raw payload to the registered consumer and settle it
    pub async fn deliver(&self, payload: &[u8]) -> SchedulerResult<DeliveryOutcome> {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SchedulerError::NotInitialized("no consumer registered".to_string()))?;

        let label = AgentTask::from_bytes(payload)
            .map(|t| t.id)
            .unwrap_or_else(|_| String::from_utf8_lossy(payload).into_owned());

        let acker = RecordingAcker {
            label,
            acked: self.acked.clone(),
            rejected: self.rejected.clone(),
        };
        settle_delivery(handler.as_ref(), payload, &acker).await
    }

    pub async fn deliver_task(&self, task: &AgentTask) -> SchedulerResult<DeliveryOutcome> {
        self.deliver(&task.to_bytes()?).await
    }
}

#[async_trait]
impl TaskBroker for MockTaskBroker {
    async fn init(&self) -> SchedulerResult<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, task: &AgentTask) -> SchedulerResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotInitialized("mock broker".to_string()));
        }

        let delay = *self.publish_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SchedulerError::Broker("mock publish failure".to_string()));
        }

        self.published.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn consume(&self, handler: Arc<dyn DeliveryHandler>) -> SchedulerResult<ConsumerHandle> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotInitialized("mock broker".to_string()));
        }

        *self.handler.lock().unwrap() = Some(handler);
        let token = CancellationToken::new();
        self.consumers.lock().unwrap().push(token.clone());
        Ok(ConsumerHandle::detached(token))
    }
}

struct RecordingAcker {
    label: String,
    acked: Arc<Mutex<Vec<String>>>,
    rejected: Arc<Mutex<Vec<(String, bool)>>>,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> SchedulerResult<()> {
        self.acked.lock().unwrap().push(self.label.clone());
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> SchedulerResult<()> {
        self.rejected
            .lock()
            .unwrap()
            .push((self.label.clone(), requeue));
        Ok(())
    }
}

/// Mock implementation of SchedulerLease for testing
#[derive(Debug, Default)]
pub struct MockSchedulerLease {
    held_elsewhere: AtomicBool,
    fail: AtomicBool,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
}

impl MockSchedulerLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate another scheduler instance holding the lease
    pub fn set_held_elsewhere(&self, held: bool) {
        self.held_elsewhere.store(held, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchedulerLease for MockSchedulerLease {
    async fn try_acquire(&self) -> SchedulerResult<bool> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SchedulerError::Lease("mock lease failure".to_string()));
        }
        if self.held_elsewhere.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn release(&self) -> SchedulerResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn owner(&self) -> &str {
        "mock-owner"
    }
}

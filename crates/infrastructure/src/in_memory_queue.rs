use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use agent_scheduler_core::{
    settle_delivery, Acknowledger, AgentTask, ConsumerHandle, DeliveryHandler, SchedulerError,
    SchedulerResult, TaskBroker,
};

/// 内存消息队列实现
///
/// 使用 Tokio channel 实现，适用于内嵌部署场景。多个消费者竞争同一个接收端，
/// 每个消费者处理完当前消息后才会取下一条。
#[derive(Debug)]
pub struct InMemoryBroker {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    initialized: AtomicBool,
    stats: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
}

/// 内存队列统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryBrokerStats {
    pub published: u64,
    pub acked: u64,
    pub rejected: u64,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            initialized: AtomicBool::new(false),
            stats: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> InMemoryBrokerStats {
        InMemoryBrokerStats {
            published: self.stats.published.load(Ordering::Relaxed),
            acked: self.stats.acked.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    async fn init(&self) -> SchedulerResult<()> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            info!("内存消息队列已初始化");
        }
        Ok(())
    }

    async fn publish(&self, task: &AgentTask) -> SchedulerResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotInitialized("内存消息队列".to_string()));
        }

        self.sender
            .send(task.to_bytes()?)
            .map_err(|e| SchedulerError::Broker(format!("发布消息失败: {e}")))?;
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        debug!(task_id = %task.id, "消息已发布到内存队列");
        Ok(())
    }

    async fn consume(&self, handler: Arc<dyn DeliveryHandler>) -> SchedulerResult<ConsumerHandle> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotInitialized("内存消息队列".to_string()));
        }

        let receiver = self.receiver.clone();
        let sender = self.sender.clone();
        let stats = self.stats.clone();
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = child.cancelled() => break,
                    payload = async { receiver.lock().await.recv().await } => payload,
                };

                let Some(payload) = payload else {
                    break;
                };

                let acker = MemoryAcker {
                    payload: payload.clone(),
                    sender: sender.clone(),
                    stats: stats.clone(),
                };
                if let Err(e) = settle_delivery(handler.as_ref(), &payload, &acker).await {
                    error!("确认内存消息失败: {}", e);
                }
            }
        });

        Ok(ConsumerHandle::new(token, handle))
    }
}

struct MemoryAcker {
    payload: Vec<u8>,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    stats: Arc<Counters>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> SchedulerResult<()> {
        self.stats.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> SchedulerResult<()> {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        if requeue {
            self.sender
                .send(self.payload.clone())
                .map_err(|e| SchedulerError::Broker(format!("重新入队失败: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_scheduler_core::{NewTask, Recurrence};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    fn task(query: &str) -> AgentTask {
        AgentTask::from_new(NewTask {
            agent_ref: "agent".to_string(),
            owner_id: "owner".to_string(),
            query: query.to_string(),
            description: String::new(),
            scheduled_time: Utc::now(),
            recurrence: Recurrence::NonRecurring,
        })
    }

    struct ForwardingHandler {
        seen: UnboundedSender<AgentTask>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl DeliveryHandler for ForwardingHandler {
        async fn handle(&self, payload: &[u8]) -> SchedulerResult<()> {
            let task = AgentTask::from_bytes(payload)?;
            let fail = self.fail_on.as_deref() == Some(task.query.as_str());
            let _ = self.seen.send(task);
            if fail {
                return Err(SchedulerError::TaskExecution("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_requires_init() {
        let broker = InMemoryBroker::new();
        let err = broker.publish(&task("q")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_acks_success_and_drops_failure() {
        let broker = InMemoryBroker::new();
        broker.init().await.unwrap();
        broker.init().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = broker
            .consume(Arc::new(ForwardingHandler {
                seen: tx,
                fail_on: Some("bad".to_string()),
            }))
            .await
            .unwrap();

        broker.publish(&task("good")).await.unwrap();
        broker.publish(&task("bad")).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.query, "good");
        assert_eq!(second.query, "bad");

        consumer.stop().await;

        let stats = broker.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_rejected_message_is_not_redelivered() {
        let broker = InMemoryBroker::new();
        broker.init().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = broker
            .consume(Arc::new(ForwardingHandler {
                seen: tx,
                fail_on: Some("bad".to_string()),
            }))
            .await
            .unwrap();

        broker.publish(&task("bad")).await.unwrap();
        assert!(rx.recv().await.is_some());

        let again = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(again.is_err());

        consumer.stop().await;
    }
}

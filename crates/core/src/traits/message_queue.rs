use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{models::AgentTask, SchedulerResult};

/// 消息队列抽象接口
///
/// 一个持久化队列，每个消费者同一时间最多持有一条未确认消息。
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// 建立连接与通道，声明持久化队列并设置预取数量为1
    async fn init(&self) -> SchedulerResult<()>;

    /// 将任务序列化为持久化消息发布到队列，未初始化时返回 `NotInitialized`
    async fn publish(&self, task: &AgentTask) -> SchedulerResult<()>;

    /// 注册消费回调，每条投递调用一次，成功确认，失败拒绝且不重新入队
    async fn consume(&self, handler: Arc<dyn DeliveryHandler>) -> SchedulerResult<ConsumerHandle>;

    /// 关闭连接，默认无操作
    async fn close(&self) -> SchedulerResult<()> {
        Ok(())
    }
}

/// 消息投递处理器
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> SchedulerResult<()>;
}

/// 单条投递的确认器
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> SchedulerResult<()>;

    async fn reject(&self, requeue: bool) -> SchedulerResult<()>;
}

/// 投递处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Rejected,
}

/// 执行处理器并根据结果确认或拒绝消息
///
/// 处理失败的消息被丢弃而不是重新入队，避免无退避的无限重试。
pub async fn settle_delivery(
    handler: &dyn DeliveryHandler,
    payload: &[u8],
    acker: &dyn Acknowledger,
) -> SchedulerResult<DeliveryOutcome> {
    match handler.handle(payload).await {
        Ok(()) => {
            acker.ack().await?;
            metrics::counter!("broker_deliveries_total", "outcome" => "acked").increment(1);
            debug!("消息处理成功，已确认");
            Ok(DeliveryOutcome::Acked)
        }
        Err(e) => {
            error!("处理消息失败，拒绝且不重新入队: {}", e);
            acker.reject(false).await?;
            metrics::counter!("broker_deliveries_total", "outcome" => "rejected").increment(1);
            Ok(DeliveryOutcome::Rejected)
        }
    }
}

/// 消费者句柄，停止后不再接收新的投递
#[derive(Debug)]
pub struct ConsumerHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn new(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// 不绑定后台任务的句柄，由调用方自行驱动投递
    pub fn detached(token: CancellationToken) -> Self {
        Self {
            token,
            handle: None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 停止消费，等待正在处理的投递完成
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("消费者任务异常退出: {}", e);
            }
        }
        info!("消费者已停止");
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulerError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAcker {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self) -> SchedulerResult<()> {
            self.calls.lock().unwrap().push("ack".to_string());
            Ok(())
        }

        async fn reject(&self, requeue: bool) -> SchedulerResult<()> {
            self.calls.lock().unwrap().push(format!("reject(requeue={requeue})"));
            Ok(())
        }
    }

    struct FixedHandler(bool);

    #[async_trait]
    impl DeliveryHandler for FixedHandler {
        async fn handle(&self, _payload: &[u8]) -> SchedulerResult<()> {
            if self.0 {
                Ok(())
            } else {
                Err(SchedulerError::TaskExecution("boom".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_success_is_acked() {
        let acker = RecordingAcker::default();
        let outcome = settle_delivery(&FixedHandler(true), b"{}", &acker).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Acked);
        assert_eq!(*acker.calls.lock().unwrap(), vec!["ack".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_is_rejected_without_requeue() {
        let acker = RecordingAcker::default();
        let outcome = settle_delivery(&FixedHandler(false), b"{}", &acker).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Rejected);
        assert_eq!(
            *acker.calls.lock().unwrap(),
            vec!["reject(requeue=false)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stop_cancels_consumer_loop() {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move { child.cancelled().await });
        let consumer = ConsumerHandle::new(token, handle);
        assert!(!consumer.is_stopped());
        consumer.stop().await;
    }
}

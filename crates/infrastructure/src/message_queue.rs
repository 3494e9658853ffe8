use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker, options::*, types::FieldTable, BasicProperties, Channel, Connection,
    ConnectionProperties,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use agent_scheduler_core::{
    config::mask_url, settle_delivery, Acknowledger, AgentTask, ConsumerHandle, DeliveryHandler,
    SchedulerError, SchedulerResult, TaskBroker,
};

const PERSISTENT: u8 = 2;
const CONTENT_TYPE_JSON: &str = "application/json";

/// RabbitMQ消息队列实现
///
/// 通道开启发布确认，只有收到 broker 的 ack 才认为发布成功。
pub struct RabbitMqBroker {
    url: String,
    queue_name: String,
    state: RwLock<Option<BrokerState>>,
}

struct BrokerState {
    connection: Connection,
    channel: Channel,
}

impl RabbitMqBroker {
    pub fn new(url: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_name: queue_name.into(),
            state: RwLock::new(None),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// 获取连接状态
    pub async fn is_connected(&self) -> bool {
        self.state
            .read()
            .await
            .as_ref()
            .map(|s| s.connection.status().connected())
            .unwrap_or(false)
    }

    async fn connect(&self) -> SchedulerResult<BrokerState> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| SchedulerError::Broker(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::Broker(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| SchedulerError::Broker(format!("开启发布确认失败: {e}")))?;

        channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::Broker(format!("声明队列 {} 失败: {e}", self.queue_name))
            })?;

        // 每个消费者最多一条未确认消息
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| SchedulerError::Broker(format!("设置预取数量失败: {e}")))?;

        info!(
            "成功连接到RabbitMQ: {}，队列 {} 已声明",
            mask_url(&self.url),
            self.queue_name
        );

        Ok(BrokerState {
            connection,
            channel,
        })
    }

    async fn channel(&self) -> SchedulerResult<Channel> {
        let state = self.state.read().await;
        let state = state
            .as_ref()
            .ok_or_else(|| SchedulerError::NotInitialized("RabbitMQ消息队列".to_string()))?;

        if !state.connection.status().connected() {
            return Err(SchedulerError::Broker("RabbitMQ连接已断开".to_string()));
        }

        Ok(state.channel.clone())
    }
}

#[async_trait]
impl TaskBroker for RabbitMqBroker {
    async fn init(&self) -> SchedulerResult<()> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.as_ref() {
            if existing.connection.status().connected() {
                debug!("RabbitMQ已初始化，跳过");
                return Ok(());
            }
            warn!("RabbitMQ连接已断开，重新连接");
        }

        *state = Some(self.connect().await?);
        Ok(())
    }

    async fn publish(&self, task: &AgentTask) -> SchedulerResult<()> {
        let channel = self.channel().await?;
        let payload = task.to_bytes()?;

        let confirm = channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type(CONTENT_TYPE_JSON.into()),
            )
            .await
            .map_err(|e| {
                SchedulerError::Broker(format!("发布消息到队列 {} 失败: {e}", self.queue_name))
            })?;

        let confirmation = confirm
            .await
            .map_err(|e| SchedulerError::Broker(format!("消息发布确认失败: {e}")))?;

        if confirmation.is_nack() {
            return Err(SchedulerError::Broker(format!(
                "RabbitMQ拒绝了任务 {} 的消息",
                task.id
            )));
        }

        debug!(task_id = %task.id, "消息已发布到队列: {}", self.queue_name);
        Ok(())
    }

    async fn consume(&self, handler: Arc<dyn DeliveryHandler>) -> SchedulerResult<ConsumerHandle> {
        let channel = self.channel().await?;
        let consumer_tag = format!("agent-worker-{}", Uuid::new_v4());

        let mut consumer = channel
            .basic_consume(
                &self.queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::Broker(format!("创建消费者失败: {e}")))?;

        info!("为队列 {} 创建消费者: {}", self.queue_name, consumer_tag);

        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    next = consumer.next() => match next {
                        Some(Ok(delivery)) => {
                            let acker = LapinAcker(delivery.acker.clone());
                            if let Err(e) =
                                settle_delivery(handler.as_ref(), &delivery.data, &acker).await
                            {
                                error!("确认消息失败: {}", e);
                            }
                        }
                        Some(Err(e)) => {
                            error!("接收消息失败: {}", e);
                            break;
                        }
                        None => {
                            warn!("消费者 {} 的消息流已结束", consumer_tag);
                            break;
                        }
                    }
                }
            }

            if let Err(e) = channel
                .basic_cancel(&consumer_tag, BasicCancelOptions::default())
                .await
            {
                debug!("取消消费者 {} 失败: {}", consumer_tag, e);
            }
        });

        Ok(ConsumerHandle::new(token, handle))
    }

    async fn close(&self) -> SchedulerResult<()> {
        if let Some(state) = self.state.write().await.take() {
            state
                .connection
                .close(200, "正常关闭")
                .await
                .map_err(|e| SchedulerError::Broker(format!("关闭连接失败: {e}")))?;
            info!("RabbitMQ连接已关闭");
        }
        Ok(())
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self) -> SchedulerResult<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| SchedulerError::Broker(format!("确认消息失败: {e}")))
    }

    async fn reject(&self, requeue: bool) -> SchedulerResult<()> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| SchedulerError::Broker(format!("拒绝消息失败: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use agent_scheduler_core::{NewTask, Recurrence};

    #[tokio::test]
    async fn test_publish_before_init_fails() {
        let broker = RabbitMqBroker::new("amqp://localhost:1", "agentTaskQueue");
        let task = AgentTask::from_new(NewTask {
            agent_ref: "agent".to_string(),
            owner_id: "owner".to_string(),
            query: "q".to_string(),
            description: String::new(),
            scheduled_time: Utc::now(),
            recurrence: Recurrence::NonRecurring,
        });

        let err = broker.publish(&task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotInitialized(_)));
        assert!(!broker.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_without_init_is_noop() {
        let broker = RabbitMqBroker::new("amqp://localhost:1", "q");
        assert!(broker.close().await.is_ok());
        assert_eq!(broker.queue_name(), "q");
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use agent_scheduler_core::{
    AgentTask, ConsumerHandle, DeliveryHandler, SchedulerResult, TaskBroker,
};

use crate::dispatch::TaskDispatch;

/// Worker服务
///
/// 从消息队列消费任务，反序列化后交给分派器执行。
/// 执行失败只记录日志并交由消息队列拒绝，Worker自身不重试。
pub struct Worker {
    broker: Arc<dyn TaskBroker>,
    dispatch: Arc<dyn TaskDispatch>,
    consumer: Mutex<Option<ConsumerHandle>>,
}

impl Worker {
    pub fn new(broker: Arc<dyn TaskBroker>, dispatch: Arc<dyn TaskDispatch>) -> Self {
        Self {
            broker,
            dispatch,
            consumer: Mutex::new(None),
        }
    }

    /// 启动Worker服务，消费者注册完成后返回
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut consumer = self.consumer.lock().await;
        if consumer.is_some() {
            warn!("Worker已在运行");
            return Ok(());
        }

        let handler = Arc::new(TaskDeliveryHandler {
            dispatch: self.dispatch.clone(),
        });
        *consumer = Some(self.broker.consume(handler).await?);

        info!("Worker已启动");
        Ok(())
    }

    /// 停止Worker服务，等待正在处理的任务完成
    pub async fn stop(&self) {
        let consumer = self.consumer.lock().await.take();
        if let Some(consumer) = consumer {
            consumer.stop().await;
            info!("Worker已停止");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.consumer
            .lock()
            .await
            .as_ref()
            .map(|c| !c.is_stopped())
            .unwrap_or(false)
    }
}

struct TaskDeliveryHandler {
    dispatch: Arc<dyn TaskDispatch>,
}

#[async_trait]
impl DeliveryHandler for TaskDeliveryHandler {
    async fn handle(&self, payload: &[u8]) -> SchedulerResult<()> {
        let task = AgentTask::from_bytes(payload).inspect_err(|e| {
            error!("无法解析任务消息: {}", e);
            metrics::counter!("worker_tasks_total", "result" => "undecodable").increment(1);
        })?;

        let task_id = task.id.clone();
        info!(task_id = %task_id, agent = %task.agent_ref, "开始处理任务");

        match self.dispatch.dispatch(task).await {
            Ok(()) => {
                info!(task_id = %task_id, "任务处理完成");
                metrics::counter!("worker_tasks_total", "result" => "succeeded").increment(1);
                Ok(())
            }
            Err(e) => {
                error!(task_id = %task_id, "任务处理失败: {}", e);
                metrics::counter!("worker_tasks_total", "result" => "failed").increment(1);
                Err(e)
            }
        }
    }
}

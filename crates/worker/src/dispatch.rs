use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use agent_scheduler_core::{AgentTask, SchedulerError, SchedulerResult};

/// 任务分派接口
///
/// 返回错误表示执行失败，消息会被拒绝且不重新入队。
#[async_trait]
pub trait TaskDispatch: Send + Sync {
    async fn dispatch(&self, task: AgentTask) -> SchedulerResult<()>;
}

/// 将异步闭包适配为 [`TaskDispatch`]
pub struct FnDispatch<F> {
    f: F,
}

impl<F> FnDispatch<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskDispatch for FnDispatch<F>
where
    F: Fn(AgentTask) -> Fut + Send + Sync,
    Fut: Future<Output = SchedulerResult<()>> + Send,
{
    async fn dispatch(&self, task: AgentTask) -> SchedulerResult<()> {
        (self.f)(task).await
    }
}

/// 只记录任务日志的分派器
#[derive(Debug, Default)]
pub struct LogDispatch;

#[async_trait]
impl TaskDispatch for LogDispatch {
    async fn dispatch(&self, task: AgentTask) -> SchedulerResult<()> {
        info!(
            task_id = %task.id,
            agent = %task.agent_ref,
            owner = %task.owner_id,
            query = %task.query,
            "收到任务"
        );
        Ok(())
    }
}

/// 通过HTTP将任务POST给执行方
///
/// 请求体与队列消息相同，非2xx响应或超时视为执行失败。
pub struct HttpDispatch {
    client: reqwest::Client,
    url: String,
}

impl HttpDispatch {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TaskDispatch for HttpDispatch {
    async fn dispatch(&self, task: AgentTask) -> SchedulerResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&task)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() { "请求超时" } else { "请求失败" };
                SchedulerError::TaskExecution(format!("分派任务 {} {reason}: {e}", task.id))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchedulerError::TaskExecution(format!(
                "执行方返回错误状态 {status}，任务 {}",
                task.id
            )));
        }

        debug!(task_id = %task.id, %status, "任务已分派到 {}", self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_scheduler_core::{NewTask, Recurrence};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn task() -> AgentTask {
        AgentTask::from_new(NewTask {
            agent_ref: "agent".to_string(),
            owner_id: "owner".to_string(),
            query: "q".to_string(),
            description: String::new(),
            scheduled_time: Utc::now(),
            recurrence: Recurrence::NonRecurring,
        })
    }

    #[tokio::test]
    async fn test_fn_dispatch_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let dispatch = FnDispatch::new(move |_task: AgentTask| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        dispatch.dispatch(task()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_dispatch_succeeds() {
        assert!(LogDispatch.dispatch(task()).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_dispatch_unreachable_is_execution_error() {
        let dispatch =
            HttpDispatch::new("http://127.0.0.1:1/tasks", Duration::from_millis(500)).unwrap();
        let err = dispatch.dispatch(task()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::TaskExecution(_)));
    }
}

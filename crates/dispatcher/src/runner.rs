use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::scheduler::AgentTaskScheduler;

/// 调度循环
///
/// 启动后每隔 `period` 执行一个调度周期。停止只阻止下一个周期开始，
/// 正在执行的周期会运行完毕。
pub struct SchedulerLoop {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerLoop {
    pub fn start(scheduler: Arc<AgentTaskScheduler>, period: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("调度循环已启动，轮询周期 {:?}", period);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        match scheduler.check_due_tasks().await {
                            Ok(_) => {}
                            Err(e) if e.is_connectivity() => {
                                warn!("外部服务不可用，下个周期重试: {}", e);
                            }
                            Err(e) => error!("调度周期执行失败: {}", e),
                        }
                    }
                }
            }

            info!("调度循环已退出");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// 停止调度循环并等待正在执行的周期结束
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("调度循环任务异常退出: {}", e);
            }
        }
    }
}

impl Drop for SchedulerLoop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agent_scheduler_core::{
    config::{mask_url, AppConfig},
    SchedulerLease, TaskBroker, TaskStore,
};
use agent_scheduler_dispatcher::{AgentTaskScheduler, SchedulerLoop};
use agent_scheduler_infrastructure::{create_broker, create_store};
use agent_scheduler_worker::{HttpDispatch, LogDispatch, TaskDispatch, Worker};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AppMode {
    /// 仅运行调度器
    Dispatcher,
    /// 仅运行Worker
    Worker,
    /// 运行所有组件
    All,
}

impl AppMode {
    fn runs_dispatcher(self) -> bool {
        matches!(self, AppMode::Dispatcher | AppMode::All)
    }

    fn runs_worker(self) -> bool {
        matches!(self, AppMode::Worker | AppMode::All)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    store: Arc<dyn TaskStore>,
    lease: Option<Arc<dyn SchedulerLease>>,
    broker: Arc<dyn TaskBroker>,
}

impl Application {
    /// 创建应用实例，连接存储与消息队列
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        if mode != AppMode::All && config.is_embedded() {
            return Err(anyhow::anyhow!(
                "memory:// 只能在 all 模式下使用，当前模式: {:?}",
                mode
            ));
        }

        info!(
            store = %mask_url(&config.store.url),
            broker = %mask_url(&config.broker.url),
            queue = %config.broker.queue_name,
            "连接外部服务"
        );

        let components = create_store(&config.store, &config.dispatcher.lease)
            .await
            .context("初始化任务存储失败")?;

        let broker = create_broker(&config.broker);
        broker.init().await.context("初始化消息队列失败")?;

        Ok(Self {
            config,
            mode,
            store: components.store,
            lease: components.lease,
            broker,
        })
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let scheduler_loop = if self.mode.runs_dispatcher() && self.config.dispatcher.enabled {
            Some(self.start_dispatcher())
        } else {
            None
        };

        let worker = if self.mode.runs_worker() && self.config.worker.enabled {
            Some(self.start_worker().await?)
        } else {
            None
        };

        if scheduler_loop.is_none() && worker.is_none() {
            warn!("调度器与Worker均未启用，等待关闭信号");
        }

        shutdown.cancelled().await;
        info!("应用收到关闭信号");

        if let Some(scheduler_loop) = scheduler_loop {
            scheduler_loop.stop().await;
            info!("调度器已停止");
        }

        if let Some(worker) = worker {
            worker.stop().await;
        }

        if let Err(e) = self.broker.close().await {
            warn!("关闭消息队列失败: {}", e);
        }

        Ok(())
    }

    fn start_dispatcher(&self) -> SchedulerLoop {
        let mut scheduler = AgentTaskScheduler::new(self.store.clone(), self.broker.clone());
        if let Some(lease) = &self.lease {
            scheduler = scheduler.with_lease(lease.clone());
        }

        let period = Duration::from_millis(self.config.dispatcher.check_interval_ms);
        SchedulerLoop::start(Arc::new(scheduler), period)
    }

    async fn start_worker(&self) -> Result<Worker> {
        let dispatch: Arc<dyn TaskDispatch> = match &self.config.worker.dispatch_url {
            Some(url) => {
                info!("任务将通过HTTP分派到 {}", url);
                Arc::new(HttpDispatch::new(
                    url,
                    Duration::from_secs(self.config.worker.dispatch_timeout_seconds),
                )?)
            }
            None => {
                info!("未配置分派地址，任务仅记录日志");
                Arc::new(LogDispatch)
            }
        };

        let worker = Worker::new(self.broker.clone(), dispatch);
        worker.start().await.context("启动Worker失败")?;
        Ok(worker)
    }
}

/// 生产方命令使用的调度器，只连接存储
pub async fn producer_scheduler(config: &AppConfig) -> Result<AgentTaskScheduler> {
    if config.store.is_memory() {
        return Err(anyhow::anyhow!("memory:// 存储只存在于运行中的进程内，无法在命令行中使用"));
    }

    let components = create_store(&config.store, &config.dispatcher.lease)
        .await
        .context("初始化任务存储失败")?;

    Ok(AgentTaskScheduler::new(
        components.store,
        create_broker(&config.broker),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_scheduler_core::config::MEMORY_URL;

    fn embedded_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.store.url = MEMORY_URL.to_string();
        config.broker.url = MEMORY_URL.to_string();
        config
    }

    #[tokio::test]
    async fn test_memory_urls_require_all_mode() {
        let result = Application::new(embedded_config(), AppMode::Worker).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_embedded_application_runs_and_stops() {
        let app = Application::new(embedded_config(), AppMode::All).await.unwrap();
        let token = CancellationToken::new();

        let run = {
            let token = token.clone();
            tokio::spawn(async move { app.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_producer_commands_reject_memory_store() {
        assert!(producer_scheduler(&embedded_config()).await.is_err());
    }
}

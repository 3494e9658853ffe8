use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    dispatcher_worker::{DispatcherConfig, WorkerConfig},
    message_queue::{BrokerConfig, StoreConfig},
    observability::ObservabilityConfig,
};

/// 环境变量前缀，层级之间用双下划线分隔
pub const ENV_PREFIX: &str = "AGENT_SCHEDULER";

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub broker: BrokerConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件与环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 内置默认值
    /// 2. 配置文件（TOML），未指定时尝试默认路径
    /// 3. 环境变量覆盖（前缀 `AGENT_SCHEDULER__`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/agent-scheduler.toml",
                "agent-scheduler.toml",
                "/etc/agent-scheduler/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        self.store.validate().context("存储配置验证失败")?;

        self.broker.validate().context("消息队列配置验证失败")?;

        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;

        self.worker.validate().context("Worker配置验证失败")?;

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if self.dispatcher.lease.enabled && self.store.is_memory() {
            return Err(anyhow::anyhow!("调度租约需要Redis存储，不能与memory://一起使用"));
        }

        let lease = &self.dispatcher.lease;
        if lease.enabled && lease.ttl_ms <= self.dispatcher.check_interval_ms {
            return Err(anyhow::anyhow!(
                "调度租约TTL({}ms)必须大于检查间隔({}ms)",
                lease.ttl_ms,
                self.dispatcher.check_interval_ms
            ));
        }

        Ok(())
    }

    /// 内嵌模式：存储或消息队列使用进程内实现
    pub fn is_embedded(&self) -> bool {
        self.store.is_memory() || self.broker.is_memory()
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 轮询周期（毫秒）
    pub check_interval_ms: u64,
    /// 历史遗留的 cron 配置，保留以兼容旧配置文件，不参与调度
    pub cron_schedule: String,
    pub lease: LeaseConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 5000,
            cron_schedule: "* * * * *".to_string(),
            lease: LeaseConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.check_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度轮询间隔必须大于0"));
        }

        self.lease.validate()?;

        Ok(())
    }
}

/// 多实例调度租约配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub enabled: bool,
    /// 租约有效期（毫秒），应大于单个调度周期的最长耗时
    pub ttl_ms: u64,
    pub key: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_ms: 30_000,
            key: "scheduler:lease".to_string(),
        }
    }
}

impl LeaseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled {
            if self.ttl_ms == 0 {
                return Err(anyhow::anyhow!("租约有效期必须大于0"));
            }
            if self.key.is_empty() {
                return Err(anyhow::anyhow!("租约键不能为空"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// HTTP 分派地址，未配置时仅记录任务日志
    pub dispatch_url: Option<String>,
    pub dispatch_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch_url: None,
            dispatch_timeout_seconds: 300,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(url) = &self.dispatch_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("分派地址必须是HTTP(S)格式: {}", url));
            }
        }

        if self.dispatch_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("分派超时时间必须大于0"));
        }

        Ok(())
    }
}

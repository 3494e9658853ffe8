use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务存储错误: {0}")]
    Store(String),

    #[error("消息队列错误: {0}")]
    Broker(String),

    #[error("组件未初始化: {0}")]
    NotInitialized(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("调度租约错误: {0}")]
    Lease(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否为连接类错误（存储或消息队列不可达）
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SchedulerError::Store(_) | SchedulerError::Broker(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;

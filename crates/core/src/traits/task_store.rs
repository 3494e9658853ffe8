//! 任务存储接口
//!
//! 存储层持有两类数据：按任务ID存放的完整任务记录，以及一个全局的
//! 按计划时间排序的索引。`save` 和 `remove` 对单个任务ID必须是原子的，
//! 并发读者不能观察到记录与索引不一致的中间状态。
//!
//! 存储层不做任何重试，连接错误直接返回给调用方。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{models::AgentTask, SchedulerResult};

/// 任务存储抽象接口
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 写入完整任务记录，并以 `scheduled_time` 为分值（重新）加入排序索引
    ///
    /// 对同一ID重复调用是幂等覆盖。
    async fn save(&self, task: &AgentTask) -> SchedulerResult<()>;

    /// 删除任务记录并移出排序索引，ID不存在时不报错
    async fn remove(&self, id: &str) -> SchedulerResult<()>;

    /// 返回所有 `scheduled_time <= now` 的任务，顺序不保证
    async fn get_due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<AgentTask>>;

    /// 按ID读取任务
    async fn get(&self, id: &str) -> SchedulerResult<Option<AgentTask>>;
}

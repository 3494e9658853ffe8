use async_trait::async_trait;

use crate::SchedulerResult;

/// 调度租约
///
/// 多个调度器实例轮询同一存储时，只有持有租约的实例执行到期扫描与提升。
#[async_trait]
pub trait SchedulerLease: Send + Sync {
    /// 尝试获取租约，已被其他实例持有时返回 `false`
    async fn try_acquire(&self) -> SchedulerResult<bool>;

    /// 释放本实例持有的租约，未持有时不做任何事
    async fn release(&self) -> SchedulerResult<()>;

    /// 租约持有者标识
    fn owner(&self) -> &str;
}

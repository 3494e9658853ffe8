use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use agent_scheduler_core::{
    AgentTask, NewTask, SchedulerLease, SchedulerResult, TaskBroker, TaskStatus, TaskStore,
};

/// 调度周期被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 上一个周期仍在执行
    CycleInProgress,
    /// 租约被其他调度器实例持有
    LeaseHeld,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CycleInProgress => "cycle_in_progress",
            SkipReason::LeaseHeld => "lease_held",
        }
    }
}

/// 单个调度周期的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub skipped: Option<SkipReason>,
    pub due: usize,
    pub published: usize,
    pub rescheduled: usize,
    pub removed: usize,
}

impl CycleReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// 任务调度器
///
/// 每个周期扫描到期任务，逐个标记为 `queued` 并保存、发布到消息队列，
/// 然后删除非周期任务或按固定相位重新排期周期任务。
///
/// 周期之间互斥：上一个周期未完成时，新周期直接跳过而不是排队等待。
/// 配置了租约时，只有拿到租约的实例才会执行扫描与提升。
pub struct AgentTaskScheduler {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn TaskBroker>,
    lease: Option<Arc<dyn SchedulerLease>>,
    cycle_guard: Mutex<()>,
}

impl AgentTaskScheduler {
    pub fn new(store: Arc<dyn TaskStore>, broker: Arc<dyn TaskBroker>) -> Self {
        Self {
            store,
            broker,
            lease: None,
            cycle_guard: Mutex::new(()),
        }
    }

    pub fn with_lease(mut self, lease: Arc<dyn SchedulerLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// 创建待调度任务，返回新任务ID
    ///
    /// 计划时间已经过去的任务会在下一次轮询时到期。
    pub async fn schedule_task(&self, new_task: NewTask) -> SchedulerResult<String> {
        new_task.recurrence.validate()?;

        let task = AgentTask::from_new(new_task);
        self.store.save(&task).await?;

        info!(
            task_id = %task.id,
            agent = %task.agent_ref,
            scheduled_time = %task.scheduled_time,
            recurring = task.recurrence.is_recurring(),
            "任务已创建"
        );
        metrics::counter!("scheduler_tasks_scheduled_total").increment(1);

        Ok(task.id)
    }

    /// 取消任务，无论任务处于何种状态；未知ID同样视为成功
    pub async fn cancel_task(&self, id: &str) -> SchedulerResult<bool> {
        self.store.remove(id).await?;
        info!(task_id = %id, "任务已取消");
        metrics::counter!("scheduler_tasks_cancelled_total").increment(1);
        Ok(true)
    }

    pub async fn get_task(&self, id: &str) -> SchedulerResult<Option<AgentTask>> {
        self.store.get(id).await
    }

    /// 以当前时间执行一个调度周期
    pub async fn check_due_tasks(&self) -> SchedulerResult<CycleReport> {
        self.run_cycle(Utc::now()).await
    }

    /// 以指定时间执行一个调度周期
    ///
    /// 任一任务的保存或发布失败会中止本周期并返回错误。该任务已以 `queued`
    /// 状态和原分数保存在到期索引中，下个周期会重新发布。
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> SchedulerResult<CycleReport> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            warn!("上一个调度周期仍在执行，跳过本次");
            return Ok(self.record_skip(SkipReason::CycleInProgress));
        };

        let Some(lease) = &self.lease else {
            return self.timed_cycle(now).await;
        };

        if !lease.try_acquire().await? {
            debug!(owner = %lease.owner(), "调度租约被其他实例持有，跳过本次");
            return Ok(self.record_skip(SkipReason::LeaseHeld));
        }

        let result = self.timed_cycle(now).await;

        if let Err(e) = lease.release().await {
            warn!(owner = %lease.owner(), "释放调度租约失败: {}", e);
        }

        result
    }

    fn record_skip(&self, reason: SkipReason) -> CycleReport {
        metrics::counter!("scheduler_cycles_total", "result" => reason.as_str()).increment(1);
        CycleReport::skipped(reason)
    }

    async fn timed_cycle(&self, now: DateTime<Utc>) -> SchedulerResult<CycleReport> {
        let start = Instant::now();
        let result = self.promote_due(now).await;
        metrics::histogram!("scheduler_cycle_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                metrics::counter!("scheduler_cycles_total", "result" => "completed").increment(1);
                if report.due > 0 {
                    info!(
                        due = report.due,
                        published = report.published,
                        rescheduled = report.rescheduled,
                        removed = report.removed,
                        "调度周期完成"
                    );
                }
            }
            Err(e) => {
                metrics::counter!("scheduler_cycles_total", "result" => "failed").increment(1);
                error!("调度周期失败: {}", e);
            }
        }

        result
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> SchedulerResult<CycleReport> {
        let due = self.store.get_due(now).await?;
        debug!(now = %now, "扫描到 {} 个到期任务", due.len());

        let mut report = CycleReport {
            due: due.len(),
            ..Default::default()
        };

        for task in due {
            self.promote(task, &mut report).await?;
        }

        Ok(report)
    }

    async fn promote(&self, mut task: AgentTask, report: &mut CycleReport) -> SchedulerResult<()> {
        task.status = TaskStatus::Queued;
        self.store.save(&task).await?;

        self.broker.publish(&task).await?;
        report.published += 1;
        metrics::counter!("scheduler_tasks_published_total").increment(1);
        debug!(task_id = %task.id, "任务已发布");

        match task.recurrence.next_after(task.scheduled_time) {
            None => {
                self.store.remove(&task.id).await?;
                report.removed += 1;
                metrics::counter!("scheduler_tasks_removed_total").increment(1);
                debug!(task_id = %task.id, "任务已完成调度并删除");
            }
            Some(next) => {
                task.scheduled_time = next;
                task.status = TaskStatus::Pending;
                self.store.save(&task).await?;
                report.rescheduled += 1;
                metrics::counter!("scheduler_tasks_rescheduled_total").increment(1);
                debug!(task_id = %task.id, next = %next, "周期任务已重新排期");
            }
        }

        Ok(())
    }
}

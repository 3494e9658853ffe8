use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::TaskRecord;
use crate::{Result, SchedulerError};

/// 调度任务
///
/// 系统中唯一的实体。`owner_id`、`agent_ref`、`query`、`description`
/// 对调度核心是不透明的，只有执行方理解其含义。
///
/// 在整个生命周期中只有 `scheduled_time` 和 `status` 会变化，
/// `id` 和 `recurrence` 创建后不可变。
///
/// # 使用示例
///
/// ```rust
/// use agent_scheduler_core::models::{AgentTask, NewTask, Recurrence, TaskStatus};
/// use chrono::{Duration, Utc};
///
/// let task = AgentTask::from_new(NewTask {
///     agent_ref: "research-agent".to_string(),
///     owner_id: "user-42".to_string(),
///     query: "summarize today's news".to_string(),
///     description: "daily digest".to_string(),
///     scheduled_time: Utc::now(),
///     recurrence: Recurrence::recurring(Duration::hours(24), None).unwrap(),
/// });
/// assert_eq!(task.status, TaskStatus::Pending);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "TaskRecord", try_from = "TaskRecord")]
pub struct AgentTask {
    pub id: String,
    pub owner_id: String,
    pub agent_ref: String,
    pub query: String,
    pub description: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: TaskStatus,
    pub recurrence: Recurrence,
}

/// 任务状态
///
/// 调度核心只写入 `Pending` 和 `Queued`，其余状态保留给执行方上报。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务的重复规则
///
/// 用和类型表达，"没有间隔却有结束时间" 这种状态无法构造。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    NonRecurring,
    Recurring {
        interval: Duration,
        end_time: Option<DateTime<Utc>>,
    },
}

impl Recurrence {
    /// 创建周期规则，间隔必须是至少1ms的整毫秒数
    ///
    /// 结束时间向下取整到毫秒。
    pub fn recurring(interval: Duration, end_time: Option<DateTime<Utc>>) -> Result<Self> {
        let rule = Recurrence::Recurring {
            interval,
            end_time: end_time.map(floor_millis),
        };
        rule.validate()?;
        Ok(rule)
    }

    /// 检查间隔能否无损写入毫秒精度的记录
    pub fn validate(&self) -> Result<()> {
        let Recurrence::Recurring { interval, .. } = self else {
            return Ok(());
        };

        if *interval < Duration::milliseconds(1) {
            return Err(SchedulerError::InvalidTaskParams(format!(
                "重复间隔必须至少为1ms，实际为 {}µs",
                interval.num_microseconds().unwrap_or(i64::MIN)
            )));
        }
        if *interval != Duration::milliseconds(interval.num_milliseconds()) {
            return Err(SchedulerError::InvalidTaskParams(format!(
                "重复间隔必须是整毫秒数，实际为 {}µs",
                interval.num_microseconds().unwrap_or(i64::MAX)
            )));
        }
        Ok(())
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Recurrence::Recurring { .. })
    }

    /// 根据任务自身的上一次计划时间计算下一次触发时间（固定相位）
    ///
    /// 非周期任务，或下一次时间超过结束时间时返回 `None`。
    pub fn next_after(&self, scheduled_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::NonRecurring => None,
            Recurrence::Recurring { interval, end_time } => {
                let next = scheduled_time.checked_add_signed(*interval)?;
                match end_time {
                    Some(end) if next > *end => None,
                    _ => Some(next),
                }
            }
        }
    }
}

/// 生产方提交的新任务
#[derive(Debug, Clone)]
pub struct NewTask {
    pub agent_ref: String,
    pub owner_id: String,
    pub query: String,
    pub description: String,
    pub scheduled_time: DateTime<Utc>,
    pub recurrence: Recurrence,
}

impl AgentTask {
    /// 分配新ID，状态为 `Pending`
    ///
    /// 计划时间与结束时间向下取整到毫秒，与存储的记录精度一致。
    pub fn from_new(new_task: NewTask) -> Self {
        let recurrence = match new_task.recurrence {
            Recurrence::NonRecurring => Recurrence::NonRecurring,
            Recurrence::Recurring { interval, end_time } => Recurrence::Recurring {
                interval,
                end_time: end_time.map(floor_millis),
            },
        };

        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: new_task.owner_id,
            agent_ref: new_task.agent_ref,
            query: new_task.query,
            description: new_task.description,
            scheduled_time: floor_millis(new_task.scheduled_time),
            status: TaskStatus::Pending,
            recurrence,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_time <= now
    }

    /// 排序分值：计划时间的毫秒时间戳
    pub fn score(&self) -> i64 {
        self.scheduled_time.timestamp_millis()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// 向下取整到毫秒
fn floor_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_recurring_rejects_non_positive_interval() {
        assert!(matches!(
            Recurrence::recurring(Duration::zero(), None),
            Err(SchedulerError::InvalidTaskParams(_))
        ));
        assert!(Recurrence::recurring(Duration::milliseconds(-5), None).is_err());
        assert!(Recurrence::recurring(Duration::milliseconds(1), None).is_ok());
    }

    #[test]
    fn test_recurring_rejects_sub_millisecond_intervals() {
        assert!(matches!(
            Recurrence::recurring(Duration::microseconds(500), None),
            Err(SchedulerError::InvalidTaskParams(_))
        ));
        assert!(Recurrence::recurring(Duration::microseconds(1_500), None).is_err());

        let bypassed = Recurrence::Recurring {
            interval: Duration::microseconds(999),
            end_time: None,
        };
        assert!(bypassed.validate().is_err());
        assert!(Recurrence::NonRecurring.validate().is_ok());
    }

    #[test]
    fn test_from_new_floors_times_to_millis() {
        let precise = at(1_000_600) + Duration::microseconds(900);
        let task = AgentTask::from_new(NewTask {
            agent_ref: "agent".to_string(),
            owner_id: "owner".to_string(),
            query: "q".to_string(),
            description: "d".to_string(),
            scheduled_time: precise,
            recurrence: Recurrence::Recurring {
                interval: Duration::milliseconds(10),
                end_time: Some(precise),
            },
        });

        assert_eq!(task.scheduled_time, at(1_000_600));
        assert_eq!(
            task.recurrence,
            Recurrence::Recurring {
                interval: Duration::milliseconds(10),
                end_time: Some(at(1_000_600)),
            }
        );
        assert_eq!(AgentTask::from_json(&task.to_json().unwrap()).unwrap(), task);
    }

    #[test]
    fn test_next_after_is_fixed_phase() {
        let rule = Recurrence::recurring(Duration::milliseconds(1000), None).unwrap();
        assert_eq!(rule.next_after(at(10_000)), Some(at(11_000)));
        assert_eq!(rule.next_after(at(11_000)), Some(at(12_000)));
        assert_eq!(Recurrence::NonRecurring.next_after(at(10_000)), None);
    }

    #[test]
    fn test_next_after_respects_end_time() {
        let rule = Recurrence::recurring(Duration::milliseconds(1000), Some(at(11_500))).unwrap();
        assert_eq!(rule.next_after(at(10_000)), Some(at(11_000)));
        assert_eq!(rule.next_after(at(11_000)), None);

        // 恰好等于结束时间仍然允许
        let rule = Recurrence::recurring(Duration::milliseconds(1000), Some(at(12_000))).unwrap();
        assert_eq!(rule.next_after(at(11_000)), Some(at(12_000)));
    }

    #[test]
    fn test_from_new_assigns_fresh_pending_task() {
        let new_task = NewTask {
            agent_ref: "agent".to_string(),
            owner_id: "owner".to_string(),
            query: "q".to_string(),
            description: "d".to_string(),
            scheduled_time: at(5_000),
            recurrence: Recurrence::NonRecurring,
        };
        let a = AgentTask::from_new(new_task.clone());
        let b = AgentTask::from_new(new_task);
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, TaskStatus::Pending);
        assert_eq!(a.score(), 5_000);
        assert!(a.is_due(at(5_000)));
        assert!(!a.is_due(at(4_999)));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Queued).unwrap(), "\"queued\"");
        assert_eq!(TaskStatus::Completed.to_string(), "completed");
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::task::{AgentTask, Recurrence, TaskStatus};
use crate::SchedulerError;

/// 任务的线上格式
///
/// 存储记录和消息队列消息共用同一个 JSON 结构。时间戳与间隔都是毫秒整数，
/// 字段名沿用执行方已经在读取的名字（`userId`、`agentId` 等）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "userId")]
    pub owner_id: String,
    #[serde(rename = "agentId")]
    pub agent_ref: String,
    #[serde(rename = "taskQuery")]
    pub query: String,
    #[serde(rename = "taskDescription")]
    pub description: String,
    pub scheduled_time: i64,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_end_time: Option<i64>,
}

impl From<AgentTask> for TaskRecord {
    fn from(task: AgentTask) -> Self {
        let (recurrence_interval, recurrence_end_time) = match task.recurrence {
            Recurrence::NonRecurring => (None, None),
            Recurrence::Recurring { interval, end_time } => (
                Some(interval.num_milliseconds()),
                end_time.map(|t| t.timestamp_millis()),
            ),
        };

        Self {
            id: task.id,
            owner_id: task.owner_id,
            agent_ref: task.agent_ref,
            query: task.query,
            description: task.description,
            scheduled_time: task.scheduled_time.timestamp_millis(),
            status: task.status,
            recurrence_interval,
            recurrence_end_time,
        }
    }
}

impl TryFrom<TaskRecord> for AgentTask {
    type Error = SchedulerError;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let scheduled_time = decode_timestamp("scheduledTime", record.scheduled_time)?;

        let recurrence = match (record.recurrence_interval, record.recurrence_end_time) {
            (None, None) => Recurrence::NonRecurring,
            (None, Some(_)) => {
                return Err(SchedulerError::Serialization(format!(
                    "任务 {} 设置了 recurrenceEndTime 但缺少 recurrenceInterval",
                    record.id
                )))
            }
            (Some(interval_ms), end_ms) => {
                if interval_ms <= 0 {
                    return Err(SchedulerError::Serialization(format!(
                        "任务 {} 的 recurrenceInterval 必须大于0: {interval_ms}",
                        record.id
                    )));
                }
                let end_time = end_ms
                    .map(|ms| decode_timestamp("recurrenceEndTime", ms))
                    .transpose()?;
                Recurrence::Recurring {
                    interval: Duration::milliseconds(interval_ms),
                    end_time,
                }
            }
        };

        Ok(AgentTask {
            id: record.id,
            owner_id: record.owner_id,
            agent_ref: record.agent_ref,
            query: record.query,
            description: record.description,
            scheduled_time,
            status: record.status,
            recurrence,
        })
    }
}

fn decode_timestamp(field: &str, ms: i64) -> Result<DateTime<Utc>, SchedulerError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SchedulerError::Serialization(format!("{field} 超出可表示范围: {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample(recurrence: Recurrence) -> AgentTask {
        AgentTask {
            id: "4f1c".to_string(),
            owner_id: "user-1".to_string(),
            agent_ref: "agent-1".to_string(),
            query: "check prices".to_string(),
            description: "hourly price check".to_string(),
            scheduled_time: Utc.timestamp_millis_opt(1_735_689_600_123).unwrap(),
            status: TaskStatus::Pending,
            recurrence,
        }
    }

    #[test]
    fn test_wire_format_uses_epoch_millis_and_executor_field_names() {
        let end = Utc.timestamp_millis_opt(1_735_689_700_000).unwrap();
        let task = sample(Recurrence::recurring(Duration::milliseconds(1000), Some(end)).unwrap());

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "4f1c",
                "userId": "user-1",
                "agentId": "agent-1",
                "taskQuery": "check prices",
                "taskDescription": "hourly price check",
                "scheduledTime": 1_735_689_600_123i64,
                "status": "pending",
                "recurrenceInterval": 1000,
                "recurrenceEndTime": 1_735_689_700_000i64
            })
        );
    }

    #[test]
    fn test_non_recurring_omits_recurrence_fields() {
        let value = serde_json::to_value(sample(Recurrence::NonRecurring)).unwrap();
        assert!(value.get("recurrenceInterval").is_none());
        assert!(value.get("recurrenceEndTime").is_none());
    }

    #[test]
    fn test_decode_restores_temporal_values() {
        let end = Utc.timestamp_millis_opt(1_735_689_700_000).unwrap();
        let task = sample(Recurrence::recurring(Duration::milliseconds(250), Some(end)).unwrap());
        let decoded = AgentTask::from_json(&task.to_json().unwrap()).unwrap();
        assert_eq!(decoded, task);
        assert_eq!(decoded.scheduled_time.timestamp_millis(), 1_735_689_600_123);
    }

    #[test]
    fn test_end_time_without_interval_is_rejected() {
        let raw = json!({
            "id": "x", "userId": "u", "agentId": "a", "taskQuery": "q", "taskDescription": "d",
            "scheduledTime": 1000, "status": "pending", "recurrenceEndTime": 5000
        });
        let err = serde_json::from_value::<AgentTask>(raw).unwrap_err();
        assert!(err.to_string().contains("recurrenceInterval"));
    }

    #[test]
    fn test_non_positive_interval_is_rejected() {
        let raw = json!({
            "id": "x", "userId": "u", "agentId": "a", "taskQuery": "q", "taskDescription": "d",
            "scheduledTime": 1000, "status": "queued", "recurrenceInterval": 0
        });
        assert!(serde_json::from_value::<AgentTask>(raw).is_err());
    }

    #[test]
    fn test_iso_timestamps_are_not_accepted() {
        let raw = json!({
            "id": "x", "userId": "u", "agentId": "a", "taskQuery": "q", "taskDescription": "d",
            "scheduledTime": "2025-01-01T00:00:00.000Z", "status": "pending"
        });
        assert!(AgentTask::from_json(&raw.to_string()).is_err());
    }
}

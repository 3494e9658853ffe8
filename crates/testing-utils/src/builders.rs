//! Test data builders for creating tasks

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use agent_scheduler_core::{AgentTask, NewTask, Recurrence, TaskStatus};

/// Builder for creating test AgentTask entities
pub struct TaskBuilder {
    id: String,
    owner_id: String,
    agent_ref: String,
    query: String,
    description: String,
    scheduled_time: DateTime<Utc>,
    status: TaskStatus,
    interval: Option<Duration>,
    end_time: Option<DateTime<Utc>>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: "test-user".to_string(),
            agent_ref: "test-agent".to_string(),
            query: "test query".to_string(),
            description: "test task".to_string(),
            scheduled_time: Utc::now(),
            status: TaskStatus::Pending,
            interval: None,
            end_time: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_owner(mut self, owner_id: &str) -> Self {
        self.owner_id = owner_id.to_string();
        self
    }

    pub fn with_agent(mut self, agent_ref: &str) -> Self {
        self.agent_ref = agent_ref.to_string();
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn scheduled_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_time = time;
        self
    }

    pub fn scheduled_at_ms(self, epoch_ms: i64) -> Self {
        self.scheduled_at(at_ms(epoch_ms))
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn every_ms(self, interval_ms: i64) -> Self {
        self.every(Duration::milliseconds(interval_ms))
    }

    pub fn until(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn until_ms(self, epoch_ms: i64) -> Self {
        self.until(at_ms(epoch_ms))
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    fn recurrence(&self) -> Recurrence {
        match self.interval {
            Some(interval) => Recurrence::Recurring {
                interval,
                end_time: self.end_time,
            },
            None => Recurrence::NonRecurring,
        }
    }

    pub fn build(self) -> AgentTask {
        AgentTask {
            recurrence: self.recurrence(),
            id: self.id,
            owner_id: self.owner_id,
            agent_ref: self.agent_ref,
            query: self.query,
            description: self.description,
            scheduled_time: self.scheduled_time,
            status: self.status,
        }
    }

    /// Producer input for `schedule_task`; id and status are ignored
    pub fn build_new(self) -> NewTask {
        NewTask {
            recurrence: self.recurrence(),
            agent_ref: self.agent_ref,
            owner_id: self.owner_id,
            query: self.query,
            description: self.description,
            scheduled_time: self.scheduled_time,
        }
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Millisecond timestamp as a UTC instant
pub fn at_ms(epoch_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .unwrap_or_else(|| panic!("timestamp out of range: {epoch_ms}"))
}

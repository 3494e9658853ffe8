use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use agent_scheduler_core::{AgentTask, SchedulerResult, TaskStore};

/// 进程内任务存储，用于内嵌模式与测试
///
/// 记录与到期索引在同一把写锁下更新，单个任务的保存与删除是原子的。
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, AgentTask>,
    index: BTreeSet<(i64, String)>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    /// 到期索引中的 (分数, id)，按分数排序
    pub async fn index_entries(&self) -> Vec<(i64, String)> {
        self.inner.read().await.index.iter().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, task: &AgentTask) -> SchedulerResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.records.get(&task.id) {
            let stale = (previous.score(), previous.id.clone());
            inner.index.remove(&stale);
        }
        inner.index.insert((task.score(), task.id.clone()));
        inner.records.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> SchedulerResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.records.remove(id) {
            inner.index.remove(&(previous.score(), previous.id));
        }
        Ok(())
    }

    async fn get_due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<AgentTask>> {
        let now_ms = now.timestamp_millis();
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .iter()
            .take_while(|(score, _)| *score <= now_ms)
            .filter_map(|(_, id)| inner.records.get(id))
            .filter(|task| task.is_due(now))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> SchedulerResult<Option<AgentTask>> {
        Ok(self.inner.read().await.records.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_scheduler_core::{NewTask, Recurrence};
    use chrono::{Duration, TimeZone};

    fn task_at(ms: i64) -> AgentTask {
        AgentTask::from_new(NewTask {
            agent_ref: "agent".to_string(),
            owner_id: "owner".to_string(),
            query: "q".to_string(),
            description: "d".to_string(),
            scheduled_time: Utc.timestamp_millis_opt(ms).unwrap(),
            recurrence: Recurrence::NonRecurring,
        })
    }

    #[tokio::test]
    async fn test_get_due_is_inclusive_of_now() {
        let store = InMemoryTaskStore::new();
        let task = task_at(1_000);
        store.save(&task).await.unwrap();

        let at = Utc.timestamp_millis_opt(1_000).unwrap();
        assert_eq!(store.get_due(at).await.unwrap().len(), 1);
        assert!(store
            .get_due(at - Duration::milliseconds(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_sub_millisecond_task_is_not_due_early() {
        let store = InMemoryTaskStore::new();
        let mut task = task_at(0);
        let millis = Utc.timestamp_millis_opt(1_000_600).unwrap();
        task.scheduled_time = millis + Duration::microseconds(900);
        store.save(&task).await.unwrap();

        let before = millis + Duration::microseconds(100);
        assert!(before < task.scheduled_time);
        assert!(store.get_due(before).await.unwrap().is_empty());
        assert_eq!(store.get_due(task.scheduled_time).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_moves_index_entry() {
        let store = InMemoryTaskStore::new();
        let mut task = task_at(1_000);
        store.save(&task).await.unwrap();

        task.scheduled_time = Utc.timestamp_millis_opt(5_000).unwrap();
        store.save(&task).await.unwrap();

        assert_eq!(store.index_entries().await, vec![(5_000, task.id.clone())]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let store = InMemoryTaskStore::new();
        store.remove("missing").await.unwrap();

        let task = task_at(0);
        store.save(&task).await.unwrap();
        store.remove(&task.id).await.unwrap();
        store.remove(&task.id).await.unwrap();
        assert!(store.is_empty().await);
        assert!(store.index_entries().await.is_empty());
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use tracing::{debug, info, instrument, warn};

use agent_scheduler_core::{
    config::mask_url, AgentTask, SchedulerError, SchedulerResult, TaskStore,
};

const RECORD_PREFIX: &str = "task:";
const PENDING_INDEX: &str = "tasks:pending";

/// 基于Redis的任务存储
///
/// 每个任务保存在 `task:{id}` 键下，到期索引是有序集合 `tasks:pending`，
/// 分数为计划时间的毫秒时间戳。记录与索引的更新放在同一个 MULTI/EXEC 中。
#[derive(Clone)]
pub struct RedisTaskStore {
    conn: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisTaskStore {
    pub async fn connect(url: &str, key_prefix: Option<String>) -> SchedulerResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SchedulerError::Store(format!("无效的Redis URL: {e}")))?;

        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| SchedulerError::Store(format!("连接Redis失败: {e}")))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::Store(format!("Redis PING失败: {e}")))?;

        info!("成功连接到Redis任务存储: {}", mask_url(url));

        Ok(Self { conn, key_prefix })
    }

    /// 供租约等组件复用同一个连接
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn record_key(&self, id: &str) -> String {
        self.namespaced(&format!("{RECORD_PREFIX}{id}"))
    }

    fn index_key(&self) -> String {
        self.namespaced(PENDING_INDEX)
    }

    fn namespaced(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }
}

fn store_error(op: &str, e: redis::RedisError) -> SchedulerError {
    SchedulerError::Store(format!("{op}失败: {e}"))
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn save(&self, task: &AgentTask) -> SchedulerResult<()> {
        let payload = task.to_json()?;
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.record_key(&task.id))
            .arg(payload)
            .ignore()
            .cmd("ZADD")
            .arg(self.index_key())
            .arg(task.score())
            .arg(&task.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| store_error("保存任务", e))?;

        debug!(status = %task.status, score = task.score(), "任务已保存");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(self.record_key(id))
            .ignore()
            .cmd("ZREM")
            .arg(self.index_key())
            .arg(id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| store_error("删除任务", e))?;

        debug!("任务已删除");
        Ok(())
    }

    async fn get_due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<AgentTask>> {
        let mut conn = self.conn.clone();

        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.index_key())
            .arg("-inf")
            .arg(now.timestamp_millis())
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("查询到期任务", e))?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
        let records: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("读取任务记录", e))?;

        let mut tasks = Vec::with_capacity(records.len());
        for (id, record) in ids.iter().zip(records) {
            match record {
                Some(json) => tasks.push(AgentTask::from_json(&json)?),
                None => warn!(task_id = %id, "到期索引中的任务记录不存在，已跳过"),
            }
        }

        debug!("查询到 {} 个到期任务", tasks.len());
        Ok(tasks)
    }

    async fn get(&self, id: &str) -> SchedulerResult<Option<AgentTask>> {
        let mut conn = self.conn.clone();

        let record: Option<String> = redis::cmd("GET")
            .arg(self.record_key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("读取任务", e))?;

        record.map(|json| AgentTask::from_json(&json)).transpose()
    }
}

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};
use uuid::Uuid;

use agent_scheduler_core::{SchedulerError, SchedulerLease, SchedulerResult};

/// 仅当租约仍属于本实例时才删除
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// 基于 `SET NX PX` 的调度租约
pub struct RedisSchedulerLease {
    conn: ConnectionManager,
    key: String,
    ttl_ms: u64,
    owner: String,
}

impl RedisSchedulerLease {
    pub fn new(conn: ConnectionManager, key: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            conn,
            key: key.into(),
            ttl_ms,
            owner: default_owner(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

fn default_owner() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{host}-{}", Uuid::new_v4())
}

#[async_trait]
impl SchedulerLease for RedisSchedulerLease {
    async fn try_acquire(&self) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.owner)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::Lease(format!("获取租约失败: {e}")))?;

        let acquired = reply.is_some();
        debug!(lease = %self.key, owner = %self.owner, acquired, "尝试获取调度租约");
        Ok(acquired)
    }

    async fn release(&self) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();

        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::Lease(format!("释放租约失败: {e}")))?;

        if deleted == 0 {
            warn!(lease = %self.key, owner = %self.owner, "租约已过期或被其他实例持有");
        }
        Ok(())
    }

    fn owner(&self) -> &str {
        &self.owner
    }
}

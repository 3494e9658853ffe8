use std::sync::Arc;

use tracing::{debug, info};

use agent_scheduler_core::{
    config::{BrokerConfig, LeaseConfig, StoreConfig},
    SchedulerLease, SchedulerResult, TaskBroker, TaskStore,
};

use crate::{InMemoryBroker, InMemoryTaskStore, RabbitMqBroker, RedisSchedulerLease, RedisTaskStore};

/// 根据配置创建的存储组件
pub struct StoreComponents {
    pub store: Arc<dyn TaskStore>,
    /// 仅在启用租约且使用Redis存储时存在
    pub lease: Option<Arc<dyn SchedulerLease>>,
}

/// 按配置创建任务存储与调度租约
pub async fn create_store(
    config: &StoreConfig,
    lease: &LeaseConfig,
) -> SchedulerResult<StoreComponents> {
    if config.is_memory() {
        info!("使用内存任务存储");
        return Ok(StoreComponents {
            store: Arc::new(InMemoryTaskStore::new()),
            lease: None,
        });
    }

    let redis = RedisTaskStore::connect(&config.url, config.key_prefix.clone()).await?;

    let lease: Option<Arc<dyn SchedulerLease>> = if lease.enabled {
        let redis_lease = RedisSchedulerLease::new(redis.connection(), &lease.key, lease.ttl_ms);
        info!(owner = %redis_lease.owner(), "已启用调度租约: {}", lease.key);
        Some(Arc::new(redis_lease))
    } else {
        None
    };

    Ok(StoreComponents {
        store: Arc::new(redis),
        lease,
    })
}

/// 按配置创建消息队列，调用方负责调用 `init`
pub fn create_broker(config: &BrokerConfig) -> Arc<dyn TaskBroker> {
    debug!("创建消息队列，队列名称: {}", config.queue_name);

    if config.is_memory() {
        info!("使用内存消息队列");
        Arc::new(InMemoryBroker::new())
    } else {
        Arc::new(RabbitMqBroker::new(&config.url, &config.queue_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_scheduler_core::config::MEMORY_URL;

    #[tokio::test]
    async fn test_memory_store_has_no_lease() {
        let config = StoreConfig {
            url: MEMORY_URL.to_string(),
            key_prefix: None,
        };
        let components = create_store(&config, &LeaseConfig::default()).await.unwrap();
        assert!(components.lease.is_none());
    }

    #[tokio::test]
    async fn test_memory_broker_publishes_after_init() {
        let broker = create_broker(&BrokerConfig {
            url: MEMORY_URL.to_string(),
            queue_name: "q".to_string(),
        });
        broker.init().await.unwrap();
    }
}

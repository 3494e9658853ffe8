pub mod app_config;
pub mod dispatcher_worker;
pub mod message_queue;
pub mod observability;

pub use app_config::AppConfig;
pub use dispatcher_worker::{DispatcherConfig, LeaseConfig, WorkerConfig};
pub use message_queue::{mask_url, BrokerConfig, StoreConfig, DEFAULT_QUEUE_NAME, MEMORY_URL};
pub use observability::ObservabilityConfig;

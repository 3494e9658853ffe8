pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::{AgentTask, NewTask, Recurrence, TaskRecord, TaskStatus};
pub use traits::{
    settle_delivery, Acknowledger, ConsumerHandle, DeliveryHandler, DeliveryOutcome,
    SchedulerLease, TaskBroker, TaskStore,
};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

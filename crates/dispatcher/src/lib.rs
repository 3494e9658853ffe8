//! 调度端
//!
//! `AgentTaskScheduler` 负责创建、取消与提升到期任务，
//! `SchedulerLoop` 按固定周期驱动调度器。

pub mod runner;
pub mod scheduler;

pub use runner::SchedulerLoop;
pub use scheduler::{AgentTaskScheduler, CycleReport, SkipReason};

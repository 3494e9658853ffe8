//! # Agent Scheduler Testing Utils
//!
//! Shared testing utilities for the agent scheduler workspace: hand-written
//! broker and lease mocks plus builders for task test data. The in-memory
//! task store from the infrastructure crate serves as the store double.
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! agent-scheduler-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```rust
//! use agent_scheduler_testing_utils::{MockTaskBroker, TaskBuilder};
//!
//! let broker = MockTaskBroker::initialized();
//! let task = TaskBuilder::new().scheduled_at_ms(1_000).every_ms(500).build();
//! assert!(task.recurrence.is_recurring());
//! assert!(broker.published().is_empty());
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;

pub mod record;
pub mod task;

pub use record::TaskRecord;
pub use task::{AgentTask, NewTask, Recurrence, TaskStatus};

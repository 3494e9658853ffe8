pub mod lease;
pub mod message_queue;
pub mod task_store;

pub use lease::*;
pub use message_queue::*;
pub use task_store::*;

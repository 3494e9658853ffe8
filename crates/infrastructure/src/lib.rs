pub mod factory;
pub mod in_memory_queue;
pub mod in_memory_store;
pub mod message_queue;
pub mod redis_lease;
pub mod redis_store;

pub use factory::*;
pub use in_memory_queue::*;
pub use in_memory_store::*;
pub use message_queue::*;
pub use redis_lease::*;
pub use redis_store::*;

pub mod dispatch;
pub mod service;

pub use dispatch::{FnDispatch, HttpDispatch, LogDispatch, TaskDispatch};
pub use service::Worker;

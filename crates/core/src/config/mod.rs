//! 配置管理
//!
//! 配置来源按优先级从低到高为：内置默认值、TOML 配置文件、
//! `AGENT_SCHEDULER__` 前缀的环境变量。所有配置在返回前都经过校验。

pub mod models;

pub use models::*;

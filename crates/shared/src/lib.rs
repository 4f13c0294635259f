//! 共享库
//!
//! 包含风控管道各服务共用的事件契约、配置、错误处理、数据库连接、Kafka、
//! 重试与死信队列、可观测性等基础设施代码。

pub mod config;
pub mod database;
pub mod dlq;
pub mod error;
pub mod events;
pub mod http;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod shutdown;
pub mod test_utils;

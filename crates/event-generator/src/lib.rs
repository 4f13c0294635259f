//! 事件模拟器
//!
//! 按间隔向 Kafka 发送订单创建、支付授权、争议发起三类事件，
//! 并注入乱序与重复投递，用于本地联调风险引擎与争议响应服务。

pub mod cli;
pub mod generator;
pub mod publisher;

pub use cli::Cli;
pub use generator::{Bundle, BundleGenerator, GeneratorSettings, OutgoingMessage};
pub use publisher::{EmitStats, Emitter, Publisher};

//! 风险状态存储
//!
//! 每个 (merchant_id, order_id) 只有一条风险状态。`merge` 是唯一的写入口，
//! 读取、合并、写回在同一个按键串行化的临界区内完成。

mod memory;
mod postgres;
mod traits;

pub use memory::InMemoryRiskStateStore;
pub use postgres::PgRiskStateStore;
pub use traits::*;

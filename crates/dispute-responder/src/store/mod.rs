//! 处置建议存储
//!
//! 每个 (merchant_id, order_id) 至多一条建议。首次写入即为终态，
//! 重复的争议事件只会读到既有记录；仅管理端重算可以覆盖。

mod memory;
mod postgres;
mod traits;

pub use memory::InMemoryRecommendationStore;
pub use postgres::PgRecommendationStore;
pub use traits::*;

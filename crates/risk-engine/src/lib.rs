//! 风险引擎
//!
//! 消费订单创建与支付授权事件，按 (merchant_id, order_id) 关联为风险评估，
//! 并通过 `GET /risk-score/{merchantId}/{orderId}` 对外提供查询。

pub mod api;
pub mod consumer;
pub mod error;
pub mod lookup;
pub mod model;
pub mod processor;
pub mod scoring;
pub mod store;

pub use error::{Result, RiskError};
pub use lookup::{LookupStatus, RiskLookup, RiskLookupResult, RiskScoreResponse, RiskView};
pub use model::{RiskState, RiskStatus};
pub use processor::RiskCorrelationEngine;

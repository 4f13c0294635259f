//! 争议响应服务
//!
//! 消费争议发起事件，结合风险评估给出处置建议（FIGHT / REFUND_NOW / REVIEW）
//! 并附带证据包，通过 `GET /recommendation/{merchantId}/{transactionId}` 对外查询。

pub mod api;
pub mod consumer;
pub mod error;
pub mod evidence;
pub mod lookup;
pub mod model;
pub mod policy;
pub mod processor;
pub mod risk_source;
pub mod store;

pub use error::{DisputeError, Result};
pub use lookup::{RecommendationLookup, RecommendationResponse, RecommendationView};
pub use model::{EvidenceBundle, RecommendationRecord, RecommendedAction, RiskAvailability};
pub use policy::DecisionPolicy;
pub use processor::DisputeDecisionEngine;
pub use risk_source::{HttpRiskSource, RiskResolver, RiskSource, StoreRiskSource};

//! 处置建议模型

use std::collections::BTreeMap;
use std::fmt;

use chargeflow_shared::events::DisputeReasonCode;
use chrono::{DateTime, Utc};
use risk_engine::RiskStatus;
use risk_engine::model::{OrderContext, PaymentContext};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 建议动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    /// 低风险，抗辩
    Fight,
    /// 高风险，直接退款
    RefundNow,
    /// 中等风险或风险数据不可靠，人工复核
    Review,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fight => "FIGHT",
            Self::RefundNow => "REFUND_NOW",
            Self::Review => "REVIEW",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FIGHT" => Some(Self::Fight),
            "REFUND_NOW" => Some(Self::RefundNow),
            "REVIEW" => Some(Self::Review),
            _ => None,
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 决策时风险数据的可信度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAvailability {
    /// COMPLETE 且未过期
    Available,
    /// 只有订单或支付之一
    Partial,
    /// 已过期
    Stale,
    /// 重试耗尽仍未取得
    Unknown,
}

impl RiskAvailability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Partial => "PARTIAL",
            Self::Stale => "STALE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// 是否为降级输入
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Available)
    }
}

/// 证据包中的标记
pub mod flags {
    pub const RISK_UNKNOWN: &str = "risk unknown";
    pub const PARTIAL_RISK: &str = "partial risk data";
    pub const STALE_RISK: &str = "stale risk data";
}

/// 争议详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeDetails {
    pub event_id: Uuid,
    pub reason_code: DisputeReasonCode,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub opened_at: DateTime<Utc>,
}

/// 决策时的风险快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskEvidence {
    pub availability: RiskAvailability,
    #[serde(default)]
    pub score: Option<i32>,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, i32>,
    #[serde(default)]
    pub status: Option<RiskStatus>,
    #[serde(default)]
    pub computed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// 取得风险数据前的尝试次数
    pub resolution_attempts: u32,
    /// 风险源最后一次报错
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// 证据包：支撑处置建议的结构化快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceBundle {
    pub dispute: DisputeDetails,
    pub risk: RiskEvidence,
    #[serde(default)]
    pub order: Option<OrderContext>,
    #[serde(default)]
    pub payment: Option<PaymentContext>,
    pub flags: Vec<String>,
    pub recommended_action: RecommendedAction,
    pub decided_at: DateTime<Utc>,
    pub correlation_id: Uuid,
}

impl EvidenceBundle {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// 每个 (merchant_id, order_id) 一条的处置建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRecord {
    pub merchant_id: String,
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub dispute_reason_code: DisputeReasonCode,
    pub dispute_amount: f64,
    pub dispute_note: Option<String>,
    pub recommended_action: RecommendedAction,
    pub evidence_bundle: EvidenceBundle,
    /// 产生该建议的争议事件 ID
    pub source_event_id: Uuid,
    pub correlation_id: Uuid,
    pub computed_at: DateTime<Utc>,
}

/// 条件写入结果
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(RecommendationRecord),
    /// 已有决策，携带既有记录
    AlreadyDecided(RecommendationRecord),
}

impl InsertOutcome {
    pub fn record(&self) -> &RecommendationRecord {
        match self {
            Self::Inserted(r) | Self::AlreadyDecided(r) => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in [
            RecommendedAction::Fight,
            RecommendedAction::RefundNow,
            RecommendedAction::Review,
        ] {
            assert_eq!(RecommendedAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(RecommendedAction::parse("ESCALATE"), None);
        assert_eq!(
            serde_json::to_value(RecommendedAction::RefundNow).unwrap(),
            "REFUND_NOW"
        );
    }

    #[test]
    fn test_availability_degraded() {
        assert!(!RiskAvailability::Available.is_degraded());
        assert!(RiskAvailability::Partial.is_degraded());
        assert!(RiskAvailability::Stale.is_degraded());
        assert!(RiskAvailability::Unknown.is_degraded());
    }
}

//! 证据包组装

use chargeflow_shared::events::{DisputeOpened, Envelope};
use chrono::{DateTime, Utc};
use risk_engine::RiskStatus;
use uuid::Uuid;

use crate::model::{
    DisputeDetails, EvidenceBundle, RecommendedAction, RiskAvailability, RiskEvidence, flags,
};
use crate::risk_source::RiskResolution;

impl From<&Envelope<DisputeOpened>> for DisputeDetails {
    fn from(envelope: &Envelope<DisputeOpened>) -> Self {
        Self {
            event_id: envelope.id,
            reason_code: envelope.data.reason_code,
            amount: envelope.data.amount,
            note: envelope.data.note.clone(),
            opened_at: envelope.time,
        }
    }
}

impl From<&RiskResolution> for RiskEvidence {
    fn from(resolution: &RiskResolution) -> Self {
        let risk = resolution.risk.as_ref();
        Self {
            availability: resolution.availability,
            score: risk.map(|r| r.risk_score),
            reasons: risk.map(|r| r.reasons.clone()).unwrap_or_default(),
            inputs: risk.map(|r| r.inputs.clone()).unwrap_or_default(),
            status: risk.map(|r| r.risk_status),
            computed_at: risk.map(|r| r.computed_at),
            expires_at: risk.map(|r| r.expires_at),
            resolution_attempts: resolution.attempts,
            last_error: resolution.last_error.clone(),
        }
    }
}

/// 风险可信度对应的标记
///
/// 过期的 PARTIAL 数据同时带不完整与过期两个标记。
pub fn flags_for(resolution: &RiskResolution) -> Vec<String> {
    let partial = resolution
        .risk
        .as_ref()
        .is_some_and(|r| r.risk_status == RiskStatus::Partial);

    let marks: &[&str] = match resolution.availability {
        RiskAvailability::Available => &[],
        RiskAvailability::Partial => &[flags::PARTIAL_RISK],
        RiskAvailability::Stale if partial => &[flags::PARTIAL_RISK, flags::STALE_RISK],
        RiskAvailability::Stale => &[flags::STALE_RISK],
        RiskAvailability::Unknown => &[flags::RISK_UNKNOWN],
    };
    marks.iter().map(|f| f.to_string()).collect()
}

/// 组装决策时刻的证据快照
pub fn build(
    dispute: DisputeDetails,
    resolution: &RiskResolution,
    action: RecommendedAction,
    correlation_id: Uuid,
    decided_at: DateTime<Utc>,
) -> EvidenceBundle {
    let risk = resolution.risk.as_ref();
    EvidenceBundle {
        dispute,
        risk: RiskEvidence::from(resolution),
        order: risk.and_then(|r| r.order.clone()),
        payment: risk.and_then(|r| r.payment.clone()),
        flags: flags_for(resolution),
        recommended_action: action,
        decided_at,
        correlation_id,
    }
}

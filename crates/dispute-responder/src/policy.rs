//! 处置决策策略

use chargeflow_shared::config::DecisionConfig;

use crate::model::{RecommendedAction, RiskAvailability};

/// 按风险分数阈值给出建议
///
/// 风险数据降级（缺失、不完整、过期）时一律 REVIEW。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionPolicy {
    pub fight_max_score: i32,
    pub refund_min_score: i32,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::from(&DecisionConfig::default())
    }
}

impl From<&DecisionConfig> for DecisionPolicy {
    fn from(config: &DecisionConfig) -> Self {
        Self {
            fight_max_score: config.fight_max_score,
            refund_min_score: config.refund_min_score,
        }
    }
}

impl DecisionPolicy {
    pub fn decide(&self, score: Option<i32>, availability: RiskAvailability) -> RecommendedAction {
        let Some(score) = score else {
            return RecommendedAction::Review;
        };
        if availability.is_degraded() {
            return RecommendedAction::Review;
        }

        if score <= self.fight_max_score {
            RecommendedAction::Fight
        } else if score >= self.refund_min_score {
            RecommendedAction::RefundNow
        } else {
            RecommendedAction::Review
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let policy = DecisionPolicy::default();
        let ok = RiskAvailability::Available;

        assert_eq!(policy.decide(Some(10), ok), RecommendedAction::Fight);
        assert_eq!(policy.decide(Some(25), ok), RecommendedAction::Fight);
        assert_eq!(policy.decide(Some(26), ok), RecommendedAction::Review);
        assert_eq!(policy.decide(Some(50), ok), RecommendedAction::Review);
        assert_eq!(policy.decide(Some(70), ok), RecommendedAction::RefundNow);
        assert_eq!(policy.decide(Some(85), ok), RecommendedAction::RefundNow);
    }

    #[test]
    fn test_degraded_risk_is_review() {
        let policy = DecisionPolicy::default();

        assert_eq!(
            policy.decide(None, RiskAvailability::Unknown),
            RecommendedAction::Review
        );
        // 低分但只有订单数据，仍需复核
        assert_eq!(
            policy.decide(Some(5), RiskAvailability::Partial),
            RecommendedAction::Review
        );
        assert_eq!(
            policy.decide(Some(90), RiskAvailability::Stale),
            RecommendedAction::Review
        );
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = DecisionPolicy::from(&DecisionConfig {
            fight_max_score: 10,
            refund_min_score: 40,
        });
        assert_eq!(
            policy.decide(Some(20), RiskAvailability::Available),
            RecommendedAction::Review
        );
        assert_eq!(
            policy.decide(Some(40), RiskAvailability::Available),
            RecommendedAction::RefundNow
        );
    }
}

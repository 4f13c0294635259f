//! 争议决策引擎
//!
//! 争议到达时查询同一订单的风险评估，按阈值给出 FIGHT / REFUND_NOW / REVIEW，
//! 连同证据包写入建议存储。同一订单只决策一次，重复投递不会改变已有结论。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chargeflow_shared::events::{
    AppEvent, DisputeOpened, Envelope, EventHandler, EventKind, MerchantResolver,
};
use chargeflow_shared::observability::metrics;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DisputeError, Result};
use crate::evidence;
use crate::model::{DisputeDetails, InsertOutcome, RecommendationRecord};
use crate::policy::DecisionPolicy;
use crate::risk_source::RiskResolver;
use crate::store::RecommendationStore;

const ACCEPTED: &[EventKind] = &[EventKind::DisputeOpened];

/// 争议决策引擎
pub struct DisputeDecisionEngine {
    resolver: RiskResolver,
    store: Arc<dyn RecommendationStore>,
    policy: DecisionPolicy,
    merchants: MerchantResolver,
}

impl DisputeDecisionEngine {
    pub fn new(
        resolver: RiskResolver,
        store: Arc<dyn RecommendationStore>,
        policy: DecisionPolicy,
        merchants: MerchantResolver,
    ) -> Self {
        Self {
            resolver,
            store,
            policy,
            merchants,
        }
    }

    /// 为一个争议事件给出建议
    ///
    /// 已有建议时直接返回既有记录，不再查询风险。
    /// 风险源暂时不可用时返回可重试错误且不写入，由消费循环重投。
    pub async fn decide(&self, envelope: &Envelope<DisputeOpened>) -> Result<InsertOutcome> {
        let merchant_id = self.merchants.resolve(envelope.merchant_id.as_deref());
        let order_id = envelope.data.order_id.as_str();

        if let Some(existing) = self.store.get(&merchant_id, order_id).await? {
            return Ok(InsertOutcome::AlreadyDecided(existing));
        }

        let record = self
            .evaluate(
                &merchant_id,
                order_id,
                DisputeDetails::from(envelope),
                envelope.correlation_id(),
                Utc::now(),
            )
            .await?;

        // 并发的重复投递可能抢先写入，以存储的条件写入为准
        self.store.insert_if_absent(record).await
    }

    /// 重新查询风险并覆盖已有建议
    pub async fn recompute(&self, merchant_id: &str, order_id: &str) -> Result<RecommendationRecord> {
        let existing = self.store.get(merchant_id, order_id).await?.ok_or_else(|| {
            DisputeError::RecommendationNotFound {
                merchant_id: merchant_id.to_string(),
                order_id: order_id.to_string(),
            }
        })?;

        let record = self
            .evaluate(
                merchant_id,
                order_id,
                existing.evidence_bundle.dispute,
                existing.correlation_id,
                Utc::now(),
            )
            .await?;
        self.store.replace(record.clone()).await?;

        info!(
            merchant_id,
            order_id,
            previous = %existing.recommended_action,
            action = %record.recommended_action,
            "处置建议已重算"
        );
        Ok(record)
    }

    async fn evaluate(
        &self,
        merchant_id: &str,
        order_id: &str,
        dispute: DisputeDetails,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RecommendationRecord> {
        let resolution = self.resolver.resolve(merchant_id, order_id).await?;
        let score = resolution.risk.as_ref().map(|r| r.risk_score);
        let action = self.policy.decide(score, resolution.availability);

        let transaction_id = resolution.risk.as_ref().and_then(|r| {
            r.transaction_id
                .clone()
                .or_else(|| r.order.as_ref().map(|o| o.transaction_id.clone()))
        });

        let bundle = evidence::build(dispute, &resolution, action, correlation_id, now);
        metrics::record_recommendation(action.as_str(), resolution.availability.as_str());

        Ok(RecommendationRecord {
            merchant_id: merchant_id.to_string(),
            order_id: order_id.to_string(),
            transaction_id,
            dispute_reason_code: bundle.dispute.reason_code,
            dispute_amount: bundle.dispute.amount,
            dispute_note: bundle.dispute.note.clone(),
            recommended_action: action,
            source_event_id: bundle.dispute.event_id,
            evidence_bundle: bundle,
            correlation_id,
            computed_at: now,
        })
    }
}

#[async_trait]
impl EventHandler for DisputeDecisionEngine {
    type Error = DisputeError;

    async fn handle(&self, event: AppEvent) -> Result<()> {
        let start = Instant::now();
        let kind = event.kind();

        let AppEvent::DisputeOpened(envelope) = &event else {
            metrics::record_event(kind.short_name(), "rejected", start.elapsed().as_secs_f64());
            return Err(DisputeError::UnsupportedEvent(kind));
        };

        let outcome = match self.decide(envelope).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let label = if e.is_retryable() { "retry" } else { "rejected" };
                warn!(
                    event_id = %envelope.id,
                    correlation_id = %envelope.correlation_id(),
                    order_id = %envelope.data.order_id,
                    error = %e,
                    "争议事件处理失败"
                );
                metrics::record_event(kind.short_name(), label, start.elapsed().as_secs_f64());
                return Err(e);
            }
        };

        match outcome {
            InsertOutcome::Inserted(record) => {
                info!(
                    event_id = %envelope.id,
                    correlation_id = %record.correlation_id,
                    merchant_id = %record.merchant_id,
                    order_id = %record.order_id,
                    action = %record.recommended_action,
                    risk = record.evidence_bundle.risk.availability.as_str(),
                    "处置建议已生成"
                );
                metrics::record_event(kind.short_name(), "applied", start.elapsed().as_secs_f64());
            }
            InsertOutcome::AlreadyDecided(record) => {
                debug!(
                    event_id = %envelope.id,
                    merchant_id = %record.merchant_id,
                    order_id = %record.order_id,
                    source_event_id = %record.source_event_id,
                    "该订单已有处置建议，跳过"
                );
                metrics::record_event(
                    kind.short_name(),
                    "duplicate",
                    start.elapsed().as_secs_f64(),
                );
            }
        }

        Ok(())
    }

    fn accepts(&self) -> &'static [EventKind] {
        ACCEPTED
    }
}

//! 风险关联引擎
//!
//! 将同一订单的订单创建与支付授权事实关联为一条不断更新的风险评估。
//! 事件可以任意顺序、任意次数到达，最终状态只取决于已到达的事件集合。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chargeflow_shared::events::{AppEvent, EventHandler, EventKind, MerchantResolver};
use chargeflow_shared::observability::metrics;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::{Result, RiskError};
use crate::model::{Contribution, MergeClock, MergeOutcome, OrderContext, PaymentContext};
use crate::store::RiskStateStore;

const ACCEPTED: &[EventKind] = &[EventKind::OrderCreated, EventKind::PaymentAuthorized];

/// 风险关联引擎
pub struct RiskCorrelationEngine {
    store: Arc<dyn RiskStateStore>,
    merchants: MerchantResolver,
    ttl: Duration,
}

impl RiskCorrelationEngine {
    pub fn new(store: Arc<dyn RiskStateStore>, merchants: MerchantResolver, ttl: Duration) -> Self {
        Self {
            store,
            merchants,
            ttl,
        }
    }

    /// 以指定时刻关联一个事件
    ///
    /// 争议事件不属于风险关联，返回不可重试错误。
    pub async fn correlate(&self, event: &AppEvent, now: DateTime<Utc>) -> Result<MergeOutcome> {
        let contribution = match event {
            AppEvent::OrderCreated(envelope) => Contribution::Order(OrderContext::from(envelope)),
            AppEvent::PaymentAuthorized(envelope) => {
                Contribution::Payment(PaymentContext::from(envelope))
            }
            AppEvent::DisputeOpened(_) => return Err(RiskError::UnsupportedEvent(event.kind())),
        };

        let merchant_id = self.merchants.resolve(event.merchant_id());
        self.store
            .merge(
                &merchant_id,
                event.order_id(),
                contribution,
                event.correlation_id(),
                MergeClock::new(now, self.ttl),
            )
            .await
    }
}

#[async_trait]
impl EventHandler for RiskCorrelationEngine {
    type Error = RiskError;

    async fn handle(&self, event: AppEvent) -> Result<()> {
        let start = Instant::now();
        let kind = event.kind();

        let outcome = match self.correlate(&event, Utc::now()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let label = if e.is_retryable() { "retry" } else { "rejected" };
                warn!(
                    event_id = %event.event_id(),
                    correlation_id = %event.correlation_id(),
                    order_id = event.order_id(),
                    event_type = %kind,
                    error = %e,
                    "风险事件处理失败"
                );
                metrics::record_event(kind.short_name(), label, start.elapsed().as_secs_f64());
                return Err(e);
            }
        };

        let state = outcome.state();
        if outcome.is_duplicate() {
            debug!(
                event_id = %event.event_id(),
                merchant_id = %state.merchant_id,
                order_id = %state.order_id,
                "重复事件，跳过"
            );
            metrics::record_event(kind.short_name(), "duplicate", start.elapsed().as_secs_f64());
            return Ok(());
        }

        info!(
            event_id = %event.event_id(),
            correlation_id = %event.correlation_id(),
            merchant_id = %state.merchant_id,
            order_id = %state.order_id,
            event_type = %kind,
            score = state.score,
            status = %state.status,
            "风险状态已更新"
        );
        metrics::record_risk_score(state.status.as_str(), state.score);
        metrics::record_event(kind.short_name(), "applied", start.elapsed().as_secs_f64());

        Ok(())
    }

    fn accepts(&self) -> &'static [EventKind] {
        ACCEPTED
    }
}

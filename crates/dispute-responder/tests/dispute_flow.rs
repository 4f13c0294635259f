//! 端到端流程：风险事件关联 -> 争议决策 -> 查询

use std::sync::Arc;
use std::time::Duration;

use chargeflow_shared::events::{DisputeReasonCode, EventHandler, MerchantResolver};
use chargeflow_shared::retry::RetryPolicy;
use chargeflow_shared::test_utils::{
    DisputeOpenedBuilder, OrderCreatedBuilder, PaymentAuthorizedBuilder,
};
use dispute_responder::model::flags;
use dispute_responder::store::{InMemoryRecommendationStore, RecommendationStore};
use dispute_responder::{
    DecisionPolicy, DisputeDecisionEngine, HttpRiskSource, RecommendationLookup,
    RecommendedAction, RiskAvailability, RiskResolver, RiskSource, StoreRiskSource,
};
use risk_engine::api::{self as risk_api};
use risk_engine::store::{InMemoryRiskStateStore, RiskStateStore};
use risk_engine::{RiskCorrelationEngine, RiskLookup};
use chrono::Utc;
use tokio::net::TcpListener;

const MERCHANT: &str = "m-1";

fn short_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
    }
}

struct Pipeline {
    risk: RiskCorrelationEngine,
    risk_store: Arc<InMemoryRiskStateStore>,
    recommendations: Arc<InMemoryRecommendationStore>,
    disputes: DisputeDecisionEngine,
}

impl Pipeline {
    fn new() -> Self {
        let risk_store = Arc::new(InMemoryRiskStateStore::new());
        let as_dyn: Arc<dyn RiskStateStore> = risk_store.clone();
        Self::with_source(risk_store, Arc::new(StoreRiskSource::new(as_dyn)))
    }

    fn with_source(risk_store: Arc<InMemoryRiskStateStore>, source: Arc<dyn RiskSource>) -> Self {
        let merchants = MerchantResolver::new(MERCHANT);
        let recommendations = Arc::new(InMemoryRecommendationStore::new());

        Self {
            risk: RiskCorrelationEngine::new(
                risk_store.clone(),
                merchants.clone(),
                chrono::Duration::hours(24),
            ),
            disputes: DisputeDecisionEngine::new(
                RiskResolver::new(source, short_retry()),
                recommendations.clone(),
                DecisionPolicy::default(),
                merchants,
            ),
            recommendations,
            risk_store,
        }
    }

    fn lookup(&self) -> RecommendationLookup {
        RecommendationLookup::new(self.recommendations.clone())
            .with_risk_store(self.risk_store.clone())
    }

    async fn seed_ord_1(&self) {
        self.risk
            .handle(
                OrderCreatedBuilder::new("ord_1")
                    .transaction_id("txn_1")
                    .billing_country("US")
                    .build(),
            )
            .await
            .unwrap();
        self.risk
            .handle(
                PaymentAuthorizedBuilder::new("ord_1")
                    .bin_country("CA")
                    .build(),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_fraud_dispute_on_low_risk_order_fights() {
    let pipeline = Pipeline::new();
    pipeline.seed_ord_1().await;

    pipeline
        .disputes
        .handle(
            DisputeOpenedBuilder::new("ord_1")
                .reason(DisputeReasonCode::Fraud)
                .build(),
        )
        .await
        .unwrap();

    let view = pipeline
        .lookup()
        .get_recommendation(MERCHANT, "txn_1")
        .await
        .unwrap()
        .expect("按交易 ID 可以查到建议");

    assert_eq!(view.recommended_action, RecommendedAction::Fight);
    assert_eq!(view.evidence_bundle.risk.score, Some(20));
    assert_eq!(
        view.evidence_bundle.risk.reasons,
        vec!["bin_country_mismatch: card issued in CA, billing country US".to_string()]
    );
    assert_eq!(view.evidence_bundle.order.unwrap().billing_country, "US");
    assert_eq!(view.evidence_bundle.payment.unwrap().bin_country, "CA");
}

#[tokio::test]
async fn test_dispute_redelivery_is_idempotent() {
    let pipeline = Pipeline::new();
    pipeline.seed_ord_1().await;

    let dispute = DisputeOpenedBuilder::new("ord_1").build();
    for _ in 0..3 {
        pipeline.disputes.handle(dispute.clone()).await.unwrap();
    }

    assert_eq!(pipeline.recommendations.len(), 1);
    let record = pipeline
        .recommendations
        .get(MERCHANT, "ord_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.source_event_id, dispute.event_id());
}

#[tokio::test]
async fn test_dispute_before_risk_degrades_to_review() {
    let pipeline = Pipeline::new();

    pipeline
        .disputes
        .handle(DisputeOpenedBuilder::new("ord_9").build())
        .await
        .unwrap();

    let record = pipeline
        .recommendations
        .get(MERCHANT, "ord_9")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.recommended_action, RecommendedAction::Review);
    assert!(record.evidence_bundle.has_flag(flags::RISK_UNKNOWN));
    assert_eq!(
        record.evidence_bundle.risk.availability,
        RiskAvailability::Unknown
    );
    assert_eq!(record.evidence_bundle.risk.resolution_attempts, 4);
}

#[tokio::test]
async fn test_dispute_before_risk_found_by_transaction_id() {
    let pipeline = Pipeline::new();

    pipeline
        .disputes
        .handle(DisputeOpenedBuilder::new("ord_1").build())
        .await
        .unwrap();
    assert!(pipeline
        .lookup()
        .get_recommendation(MERCHANT, "txn_1")
        .await
        .unwrap()
        .is_none());

    // 订单与支付晚于争议到达，交易 ID 仍能查到已做出的建议
    pipeline.seed_ord_1().await;

    let view = pipeline
        .lookup()
        .get_recommendation(MERCHANT, "txn_1")
        .await
        .unwrap()
        .expect("交易 ID 经风险状态反查到订单");
    assert_eq!(view.order_id, "ord_1");
    assert_eq!(view.transaction_id.as_deref(), Some("txn_1"));
    assert_eq!(view.recommended_action, RecommendedAction::Review);
}

#[tokio::test]
async fn test_expired_risk_is_stale_review() {
    let pipeline = Pipeline::new();
    let two_days_ago = Utc::now() - chrono::Duration::hours(48);

    for event in [
        OrderCreatedBuilder::new("ord_5")
            .billing_country("US")
            .build(),
        PaymentAuthorizedBuilder::new("ord_5")
            .bin_country("US")
            .build(),
    ] {
        pipeline.risk.correlate(&event, two_days_ago).await.unwrap();
    }

    pipeline
        .disputes
        .handle(DisputeOpenedBuilder::new("ord_5").build())
        .await
        .unwrap();

    let record = pipeline
        .recommendations
        .get(MERCHANT, "ord_5")
        .await
        .unwrap()
        .unwrap();
    // 低分但已过期，不据此抗辩
    assert_eq!(record.recommended_action, RecommendedAction::Review);
    assert!(record.evidence_bundle.has_flag(flags::STALE_RISK));
    assert!(!record.evidence_bundle.has_flag(flags::RISK_UNKNOWN));
    assert_eq!(
        record.evidence_bundle.risk.availability,
        RiskAvailability::Stale
    );
    assert_eq!(record.evidence_bundle.risk.resolution_attempts, 1);
}

#[tokio::test]
async fn test_order_only_risk_is_review() {
    let pipeline = Pipeline::new();
    pipeline
        .risk
        .handle(OrderCreatedBuilder::new("ord_2").build())
        .await
        .unwrap();

    pipeline
        .disputes
        .handle(DisputeOpenedBuilder::new("ord_2").build())
        .await
        .unwrap();

    let record = pipeline
        .recommendations
        .get(MERCHANT, "ord_2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.recommended_action, RecommendedAction::Review);
    assert!(record.evidence_bundle.has_flag(flags::PARTIAL_RISK));
}

#[tokio::test]
async fn test_high_risk_order_refunds() {
    let pipeline = Pipeline::new();
    pipeline
        .risk
        .handle(
            OrderCreatedBuilder::new("ord_3")
                .email("buyer@mailinator.com")
                .amount(1500.0)
                .billing_country("US")
                .build(),
        )
        .await
        .unwrap();
    pipeline
        .risk
        .handle(
            PaymentAuthorizedBuilder::new("ord_3")
                .amount(1400.0)
                .currency("EUR")
                .bin_country("NG")
                .build(),
        )
        .await
        .unwrap();

    pipeline
        .disputes
        .handle(DisputeOpenedBuilder::new("ord_3").build())
        .await
        .unwrap();

    let record = pipeline
        .recommendations
        .get(MERCHANT, "ord_3")
        .await
        .unwrap()
        .unwrap();
    // 一次性邮箱 20 + 高金额 20 + BIN 国家不一致 20 + 金额不符 15 + 币种不符 15
    assert_eq!(record.evidence_bundle.risk.score, Some(90));
    assert_eq!(record.recommended_action, RecommendedAction::RefundNow);
}

#[tokio::test]
async fn test_http_risk_source_against_risk_engine() {
    let risk_store = Arc::new(InMemoryRiskStateStore::new());
    let as_dyn: Arc<dyn RiskStateStore> = risk_store.clone();
    let app = risk_api::router(risk_api::AppState {
        lookup: Arc::new(RiskLookup::new(as_dyn)),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let source = HttpRiskSource::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let pipeline = Pipeline::with_source(risk_store, Arc::new(source));

    // 风险尚未计算时 404 被视为缺失
    pipeline
        .disputes
        .handle(DisputeOpenedBuilder::new("ord_404").build())
        .await
        .unwrap();
    let degraded = pipeline
        .recommendations
        .get(MERCHANT, "ord_404")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(degraded.recommended_action, RecommendedAction::Review);

    pipeline.seed_ord_1().await;
    pipeline
        .disputes
        .handle(DisputeOpenedBuilder::new("ord_1").build())
        .await
        .unwrap();
    let record = pipeline
        .recommendations
        .get(MERCHANT, "ord_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.recommended_action, RecommendedAction::Fight);
    assert_eq!(record.transaction_id.as_deref(), Some("txn_1"));
}

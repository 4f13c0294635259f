//! 风险关联端到端测试：引擎 + 内存存储 + 查询

use std::sync::Arc;

use chargeflow_shared::events::{AppEvent, EventHandler, MerchantResolver};
use chargeflow_shared::test_utils::{OrderCreatedBuilder, PaymentAuthorizedBuilder};
use chrono::{Duration, Utc};
use risk_engine::store::{InMemoryRiskStateStore, RiskStateStore};
use risk_engine::{RiskCorrelationEngine, RiskLookup, RiskLookupResult, RiskState, RiskStatus};

const MERCHANT: &str = "merchant-default";

fn setup() -> (Arc<InMemoryRiskStateStore>, RiskCorrelationEngine) {
    let store = Arc::new(InMemoryRiskStateStore::new());
    let engine = RiskCorrelationEngine::new(
        store.clone(),
        MerchantResolver::new(MERCHANT),
        Duration::hours(24),
    );
    (store, engine)
}

/// 可比较的最终状态（去掉时间戳与事件 ID 的顺序）
fn fingerprint(state: &RiskState) -> (i32, RiskStatus, Vec<(String, i32)>, Vec<String>) {
    let mut reasons = state.reasons.clone();
    reasons.sort();
    (
        state.score,
        state.status,
        state.inputs.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        reasons,
    )
}

fn bundle(order_id: &str) -> Vec<AppEvent> {
    vec![
        OrderCreatedBuilder::new(order_id)
            .email("buyer@mailinator.com")
            .amount(640.0)
            .billing_country("US")
            .build(),
        PaymentAuthorizedBuilder::new(order_id)
            .amount(640.0)
            .bin_country("CA")
            .build(),
    ]
}

#[tokio::test]
async fn test_order_independence() {
    let events = bundle("ord_perm");

    let (forward_store, forward) = setup();
    for event in events.iter().cloned() {
        forward.handle(event).await.unwrap();
    }

    let (reverse_store, reverse) = setup();
    for event in events.iter().rev().cloned() {
        reverse.handle(event).await.unwrap();
    }

    let a = forward_store.get(MERCHANT, "ord_perm").await.unwrap().unwrap();
    let b = reverse_store.get(MERCHANT, "ord_perm").await.unwrap().unwrap();
    assert_eq!(fingerprint(&a), fingerprint(&b));
    // 一次性邮箱 20 + 高金额 10 + 国家不一致 20
    assert_eq!(a.score, 50);
    assert_eq!(a.status, RiskStatus::Complete);
}

#[tokio::test]
async fn test_redelivery_does_not_double_count() {
    let (store, engine) = setup();
    let events = bundle("ord_dup");

    for event in events.iter().cloned() {
        engine.handle(event).await.unwrap();
    }
    let once = store.get(MERCHANT, "ord_dup").await.unwrap().unwrap();

    for _ in 0..3 {
        for event in events.iter().cloned() {
            engine.handle(event).await.unwrap();
        }
    }
    let many = store.get(MERCHANT, "ord_dup").await.unwrap().unwrap();

    assert_eq!(fingerprint(&once), fingerprint(&many));
    assert_eq!(many.applied_event_ids.len(), 2);
    assert_eq!(once.computed_at, many.computed_at);
}

#[tokio::test]
async fn test_score_bounded() {
    let (store, engine) = setup();

    engine
        .handle(
            OrderCreatedBuilder::new("ord_max")
                .email("x@mailinator.com")
                .amount(5000.0)
                .currency("USD")
                .billing_country("US")
                .build(),
        )
        .await
        .unwrap();
    engine
        .handle(
            PaymentAuthorizedBuilder::new("ord_max")
                .amount(10.0)
                .currency("EUR")
                .bin_country("GB")
                .build(),
        )
        .await
        .unwrap();

    let state = store.get(MERCHANT, "ord_max").await.unwrap().unwrap();
    assert!((0..=100).contains(&state.score));
    assert!(state.inputs.values().all(|v| (0..=20).contains(v)));
    assert_eq!(state.score, state.inputs.values().sum::<i32>().min(100));
}

#[tokio::test]
async fn test_lookup_after_correlation() {
    let (store, engine) = setup();
    engine
        .handle(OrderCreatedBuilder::new("ord_1").billing_country("US").build())
        .await
        .unwrap();

    let lookup = RiskLookup::new(store.clone());

    let RiskLookupResult::Found(view) = lookup.get_risk(MERCHANT, "ord_1", Utc::now()).await.unwrap()
    else {
        panic!("预期 FOUND");
    };
    assert_eq!(view.risk_status, RiskStatus::Partial);

    let later = Utc::now() + Duration::hours(25);
    assert!(matches!(
        lookup.get_risk(MERCHANT, "ord_1", later).await.unwrap(),
        RiskLookupResult::Expired(_)
    ));
    assert_eq!(
        lookup.get_risk(MERCHANT, "ord_missing", Utc::now()).await.unwrap(),
        RiskLookupResult::NotFound
    );
}

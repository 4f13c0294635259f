//! PostgreSQL 风险状态存储
//!
//! 合并在单个事务内完成：先以 `ON CONFLICT DO NOTHING` 写入占位行，
//! 再用 `SELECT ... FOR UPDATE` 锁定该行，应用合并后写回。
//! 行锁保证同一订单的订单事件与支付事件即使由不同进程并发处理也不会互相覆盖。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use super::traits::RiskStateStore;
use crate::error::{Result, RiskError};
use crate::model::{
    Contribution, MergeClock, MergeOutcome, OrderContext, PaymentContext, RiskState, RiskStatus,
};

const SELECT_COLUMNS: &str = r#"
    SELECT merchant_id, order_id, transaction_id, risk_score, reasons, inputs, status,
           order_context, payment_context, correlation_id, applied_event_ids,
           computed_at, expires_at
    FROM risk_scores
    WHERE merchant_id = $1 AND order_id = $2
"#;

/// risk_scores 表的行映射
#[derive(Debug, sqlx::FromRow)]
struct RiskScoreRow {
    merchant_id: String,
    order_id: String,
    transaction_id: Option<String>,
    risk_score: i32,
    reasons: Vec<String>,
    inputs: Json<BTreeMap<String, i32>>,
    status: String,
    order_context: Option<Json<OrderContext>>,
    payment_context: Option<Json<PaymentContext>>,
    correlation_id: Option<Uuid>,
    applied_event_ids: Vec<Uuid>,
    computed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<RiskScoreRow> for RiskState {
    type Error = RiskError;

    fn try_from(row: RiskScoreRow) -> Result<Self> {
        let status = RiskStatus::parse(&row.status).ok_or_else(|| {
            RiskError::CorruptState(format!(
                "merchant_id={} order_id={} status={}",
                row.merchant_id, row.order_id, row.status
            ))
        })?;

        Ok(Self {
            merchant_id: row.merchant_id,
            order_id: row.order_id,
            transaction_id: row.transaction_id,
            inputs: row.inputs.0,
            score: row.risk_score,
            reasons: row.reasons,
            status,
            order: row.order_context.map(|c| c.0),
            payment: row.payment_context.map(|c| c.0),
            correlation_id: row.correlation_id,
            applied_event_ids: row.applied_event_ids,
            computed_at: row.computed_at,
            expires_at: row.expires_at,
        })
    }
}

pub struct PgRiskStateStore {
    pool: PgPool,
}

impl PgRiskStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RiskStateStore for PgRiskStateStore {
    async fn get(&self, merchant_id: &str, order_id: &str) -> Result<Option<RiskState>> {
        let row = sqlx::query_as::<_, RiskScoreRow>(SELECT_COLUMNS)
            .bind(merchant_id)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RiskState::try_from).transpose()
    }

    async fn find_order_id(
        &self,
        merchant_id: &str,
        transaction_id: &str,
    ) -> Result<Option<String>> {
        let order_id = sqlx::query_scalar::<_, String>(
            r#"
            SELECT order_id FROM risk_scores
            WHERE merchant_id = $1 AND transaction_id = $2
            LIMIT 1
            "#,
        )
        .bind(merchant_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order_id)
    }

    async fn merge(
        &self,
        merchant_id: &str,
        order_id: &str,
        contribution: Contribution,
        correlation_id: Uuid,
        clock: MergeClock,
    ) -> Result<MergeOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO risk_scores (merchant_id, order_id, status, computed_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (merchant_id, order_id) DO NOTHING
            "#,
        )
        .bind(merchant_id)
        .bind(order_id)
        .bind(RiskStatus::Partial.as_str())
        .bind(clock.now)
        .bind(clock.now + clock.ttl)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, RiskScoreRow>(&format!("{SELECT_COLUMNS} FOR UPDATE"))
            .bind(merchant_id)
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut state = RiskState::try_from(row)?;

        if !state.apply(contribution, correlation_id, clock) {
            tx.commit().await?;
            debug!(merchant_id, order_id, "事件已应用过，风险状态未变");
            return Ok(MergeOutcome::Duplicate(state));
        }

        sqlx::query(
            r#"
            UPDATE risk_scores
            SET transaction_id = $3,
                risk_score = $4,
                reasons = $5,
                inputs = $6,
                status = $7,
                order_context = $8,
                payment_context = $9,
                correlation_id = $10,
                applied_event_ids = $11,
                computed_at = $12,
                expires_at = $13
            WHERE merchant_id = $1 AND order_id = $2
            "#,
        )
        .bind(merchant_id)
        .bind(order_id)
        .bind(&state.transaction_id)
        .bind(state.score)
        .bind(&state.reasons)
        .bind(Json(&state.inputs))
        .bind(state.status.as_str())
        .bind(state.order.as_ref().map(Json))
        .bind(state.payment.as_ref().map(Json))
        .bind(state.correlation_id)
        .bind(&state.applied_event_ids)
        .bind(state.computed_at)
        .bind(state.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MergeOutcome::Applied(state))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chargeflow_shared::database::Database;
    use chargeflow_shared::test_utils::{test_database_config, test_order_id};
    use chrono::Duration;

    use super::*;

    async fn store() -> PgRiskStateStore {
        let db = Database::connect(&test_database_config()).await.unwrap();
        db.run_migrations().await.unwrap();
        PgRiskStateStore::new(db.pool().clone())
    }

    fn clock() -> MergeClock {
        MergeClock::new(Utc::now(), Duration::hours(24))
    }

    fn order(billing_country: &str) -> Contribution {
        Contribution::Order(OrderContext {
            event_id: Uuid::new_v4(),
            transaction_id: "txn_pg".to_string(),
            amount: 120.0,
            currency: "USD".to_string(),
            email_domain: "gmail.com".to_string(),
            billing_country: billing_country.to_string(),
        })
    }

    fn payment(bin_country: &str) -> Contribution {
        Contribution::Payment(PaymentContext {
            event_id: Uuid::new_v4(),
            payment_id: "pay_pg".to_string(),
            amount: 120.0,
            currency: "USD".to_string(),
            bin_country: bin_country.to_string(),
        })
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_merge_round_trip() {
        let store = store().await;
        let order_id = test_order_id();

        let payment_first = store
            .merge("m-pg", &order_id, payment("CA"), Uuid::new_v4(), clock())
            .await
            .unwrap();
        assert_eq!(payment_first.state().status, RiskStatus::Partial);

        store
            .merge("m-pg", &order_id, order("US"), Uuid::new_v4(), clock())
            .await
            .unwrap();

        let state = store.get("m-pg", &order_id).await.unwrap().unwrap();
        assert_eq!(state.status, RiskStatus::Complete);
        assert_eq!(state.score, 25);
        assert_eq!(state.transaction_id.as_deref(), Some("txn_pg"));
        assert_eq!(state.applied_event_ids.len(), 2);
        assert_eq!(state.order.unwrap().billing_country, "US");
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_find_order_id_after_order() {
        let store = store().await;
        let order_id = test_order_id();
        let transaction_id = format!("txn_{order_id}");

        assert!(store
            .find_order_id("m-pg", &transaction_id)
            .await
            .unwrap()
            .is_none());

        let Contribution::Order(mut context) = order("US") else {
            unreachable!();
        };
        context.transaction_id = transaction_id.clone();
        store
            .merge("m-pg", &order_id, Contribution::Order(context), Uuid::new_v4(), clock())
            .await
            .unwrap();

        assert_eq!(
            store.find_order_id("m-pg", &transaction_id).await.unwrap(),
            Some(order_id)
        );
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_merge_duplicate_is_noop() {
        let store = store().await;
        let order_id = test_order_id();
        let contribution = order("US");

        store
            .merge("m-pg", &order_id, contribution.clone(), Uuid::new_v4(), clock())
            .await
            .unwrap();
        let again = store
            .merge("m-pg", &order_id, contribution, Uuid::new_v4(), clock())
            .await
            .unwrap();

        assert!(again.is_duplicate());
        assert_eq!(again.state().applied_event_ids.len(), 1);
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_concurrent_order_and_payment() {
        let store = Arc::new(store().await);
        let order_id = test_order_id();

        let a = {
            let store = store.clone();
            let order_id = order_id.clone();
            tokio::spawn(async move {
                store
                    .merge("m-pg", &order_id, order("US"), Uuid::new_v4(), clock())
                    .await
            })
        };
        let b = {
            let store = store.clone();
            let order_id = order_id.clone();
            tokio::spawn(async move {
                store
                    .merge("m-pg", &order_id, payment("CA"), Uuid::new_v4(), clock())
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let state = store.get("m-pg", &order_id).await.unwrap().unwrap();
        assert_eq!(state.status, RiskStatus::Complete);
        assert_eq!(state.inputs.get("bin_country_mismatch"), Some(&20));
    }
}

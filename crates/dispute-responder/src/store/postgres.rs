//! PostgreSQL 处置建议存储
//!
//! 首写即终态依赖 `ON CONFLICT DO NOTHING RETURNING`：没有返回行说明已有决策，
//! 再读出既有记录返回给调用方。

use async_trait::async_trait;
use chargeflow_shared::events::DisputeReasonCode;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::traits::RecommendationStore;
use crate::error::{DisputeError, Result};
use crate::model::{EvidenceBundle, InsertOutcome, RecommendationRecord, RecommendedAction};

const COLUMNS: &str = r#"
    merchant_id, order_id, transaction_id, dispute_reason_code, dispute_amount,
    dispute_note, recommended_action, evidence_bundle, source_event_id,
    correlation_id, computed_at
"#;

/// dispute_recommendations 表的行映射
#[derive(Debug, sqlx::FromRow)]
struct RecommendationRow {
    merchant_id: String,
    order_id: String,
    transaction_id: Option<String>,
    dispute_reason_code: String,
    dispute_amount: f64,
    dispute_note: Option<String>,
    recommended_action: String,
    evidence_bundle: Json<EvidenceBundle>,
    source_event_id: Uuid,
    correlation_id: Uuid,
    computed_at: DateTime<Utc>,
}

impl TryFrom<RecommendationRow> for RecommendationRecord {
    type Error = DisputeError;

    fn try_from(row: RecommendationRow) -> Result<Self> {
        let corrupt = |field: &str, value: &str| {
            DisputeError::CorruptRecord(format!(
                "merchant_id={} order_id={} {field}={value}",
                row.merchant_id, row.order_id
            ))
        };
        let dispute_reason_code = DisputeReasonCode::parse(&row.dispute_reason_code)
            .ok_or_else(|| corrupt("dispute_reason_code", &row.dispute_reason_code))?;
        let recommended_action = RecommendedAction::parse(&row.recommended_action)
            .ok_or_else(|| corrupt("recommended_action", &row.recommended_action))?;

        Ok(Self {
            merchant_id: row.merchant_id,
            order_id: row.order_id,
            transaction_id: row.transaction_id,
            dispute_reason_code,
            dispute_amount: row.dispute_amount,
            dispute_note: row.dispute_note,
            recommended_action,
            evidence_bundle: row.evidence_bundle.0,
            source_event_id: row.source_event_id,
            correlation_id: row.correlation_id,
            computed_at: row.computed_at,
        })
    }
}

pub struct PgRecommendationStore {
    pool: PgPool,
}

impl PgRecommendationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn get(&self, merchant_id: &str, order_id: &str) -> Result<Option<RecommendationRecord>> {
        let row = sqlx::query_as::<_, RecommendationRow>(&format!(
            "SELECT {COLUMNS} FROM dispute_recommendations WHERE merchant_id = $1 AND order_id = $2"
        ))
        .bind(merchant_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecommendationRecord::try_from).transpose()
    }

    async fn find_by_reference(
        &self,
        merchant_id: &str,
        reference: &str,
    ) -> Result<Option<RecommendationRecord>> {
        let row = sqlx::query_as::<_, RecommendationRow>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM dispute_recommendations
            WHERE merchant_id = $1 AND (transaction_id = $2 OR order_id = $2)
            ORDER BY CASE WHEN transaction_id = $2 THEN 0 ELSE 1 END
            LIMIT 1
            "#
        ))
        .bind(merchant_id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecommendationRecord::try_from).transpose()
    }

    async fn insert_if_absent(&self, record: RecommendationRecord) -> Result<InsertOutcome> {
        let inserted = sqlx::query_as::<_, RecommendationRow>(&format!(
            r#"
            INSERT INTO dispute_recommendations ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (merchant_id, order_id) DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&record.merchant_id)
        .bind(&record.order_id)
        .bind(&record.transaction_id)
        .bind(record.dispute_reason_code.as_str())
        .bind(record.dispute_amount)
        .bind(&record.dispute_note)
        .bind(record.recommended_action.as_str())
        .bind(Json(&record.evidence_bundle))
        .bind(record.source_event_id)
        .bind(record.correlation_id)
        .bind(record.computed_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(row.try_into()?));
        }

        let existing = self
            .get(&record.merchant_id, &record.order_id)
            .await?
            .ok_or_else(|| DisputeError::RecommendationNotFound {
                merchant_id: record.merchant_id.clone(),
                order_id: record.order_id.clone(),
            })?;
        Ok(InsertOutcome::AlreadyDecided(existing))
    }

    async fn replace(&self, record: RecommendationRecord) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO dispute_recommendations ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (merchant_id, order_id) DO UPDATE SET
                transaction_id = EXCLUDED.transaction_id,
                dispute_reason_code = EXCLUDED.dispute_reason_code,
                dispute_amount = EXCLUDED.dispute_amount,
                dispute_note = EXCLUDED.dispute_note,
                recommended_action = EXCLUDED.recommended_action,
                evidence_bundle = EXCLUDED.evidence_bundle,
                source_event_id = EXCLUDED.source_event_id,
                correlation_id = EXCLUDED.correlation_id,
                computed_at = EXCLUDED.computed_at
            "#
        ))
        .bind(&record.merchant_id)
        .bind(&record.order_id)
        .bind(&record.transaction_id)
        .bind(record.dispute_reason_code.as_str())
        .bind(record.dispute_amount)
        .bind(&record.dispute_note)
        .bind(record.recommended_action.as_str())
        .bind(Json(&record.evidence_bundle))
        .bind(record.source_event_id)
        .bind(record.correlation_id)
        .bind(record.computed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

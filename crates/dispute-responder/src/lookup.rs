//! 处置建议查询

use std::sync::Arc;

use chrono::{DateTime, Utc};
use risk_engine::LookupStatus;
use risk_engine::store::RiskStateStore;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{EvidenceBundle, RecommendationRecord, RecommendedAction};
use crate::store::RecommendationStore;

/// 对外暴露的处置建议视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationView {
    pub merchant_id: String,
    pub order_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub recommended_action: RecommendedAction,
    pub evidence_bundle: EvidenceBundle,
    pub computed_at: DateTime<Utc>,
}

impl From<RecommendationRecord> for RecommendationView {
    fn from(record: RecommendationRecord) -> Self {
        Self {
            merchant_id: record.merchant_id,
            order_id: record.order_id,
            transaction_id: record.transaction_id,
            recommended_action: record.recommended_action,
            evidence_bundle: record.evidence_bundle,
            computed_at: record.computed_at,
        }
    }
}

/// `GET /recommendation` 的 200 响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub status: LookupStatus,
    #[serde(flatten)]
    pub recommendation: RecommendationView,
}

/// 处置建议查询服务
///
/// 建议没有有效期，结果只有 FOUND 与 NOT_FOUND。
#[derive(Clone)]
pub struct RecommendationLookup {
    store: Arc<dyn RecommendationStore>,
    risk: Option<Arc<dyn RiskStateStore>>,
}

impl RecommendationLookup {
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store, risk: None }
    }

    /// 决策时尚无订单数据的建议不带交易 ID，查询时借风险状态反查订单
    pub fn with_risk_store(mut self, risk: Arc<dyn RiskStateStore>) -> Self {
        self.risk = Some(risk);
        self
    }

    /// reference 可以是交易 ID 或订单 ID
    pub async fn get_recommendation(
        &self,
        merchant_id: &str,
        reference: &str,
    ) -> Result<Option<RecommendationView>> {
        if let Some(record) = self.store.find_by_reference(merchant_id, reference).await? {
            return Ok(Some(record.into()));
        }

        let Some(risk) = &self.risk else {
            return Ok(None);
        };
        let Some(order_id) = risk.find_order_id(merchant_id, reference).await? else {
            return Ok(None);
        };

        let record = self.store.get(merchant_id, &order_id).await?;
        Ok(record.map(|mut record| {
            record
                .transaction_id
                .get_or_insert_with(|| reference.to_string());
            record.into()
        }))
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

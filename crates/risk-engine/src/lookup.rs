//! 风险评估查询
//!
//! 只读访问风险状态存储。过期的状态仍然返回，但标记为 EXPIRED。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{OrderContext, PaymentContext, RiskState, RiskStatus};
use crate::store::RiskStateStore;

/// 查询结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupStatus {
    Found,
    Expired,
    NotFound,
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "FOUND",
            Self::Expired => "EXPIRED",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

/// 对外暴露的风险评估视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskView {
    pub merchant_id: String,
    pub order_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub risk_score: i32,
    pub reasons: Vec<String>,
    pub risk_status: RiskStatus,
    #[serde(default)]
    pub inputs: BTreeMap<String, i32>,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentContext>,
}

impl From<RiskState> for RiskView {
    fn from(state: RiskState) -> Self {
        Self {
            merchant_id: state.merchant_id,
            order_id: state.order_id,
            transaction_id: state.transaction_id,
            risk_score: state.score,
            reasons: state.reasons,
            risk_status: state.status,
            inputs: state.inputs,
            computed_at: state.computed_at,
            expires_at: state.expires_at,
            order: state.order,
            payment: state.payment,
        }
    }
}

/// `GET /risk-score` 的 200 响应体，HTTP 风险源也按此格式解析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScoreResponse {
    pub status: LookupStatus,
    #[serde(flatten)]
    pub risk: RiskView,
}

/// 风险查询结果
#[derive(Debug, Clone, PartialEq)]
pub enum RiskLookupResult {
    Found(RiskView),
    Expired(RiskView),
    NotFound,
}

impl RiskLookupResult {
    pub fn status(&self) -> LookupStatus {
        match self {
            Self::Found(_) => LookupStatus::Found,
            Self::Expired(_) => LookupStatus::Expired,
            Self::NotFound => LookupStatus::NotFound,
        }
    }
}

/// 风险查询服务
#[derive(Clone)]
pub struct RiskLookup {
    store: Arc<dyn RiskStateStore>,
}

impl RiskLookup {
    pub fn new(store: Arc<dyn RiskStateStore>) -> Self {
        Self { store }
    }

    /// 按 (merchant_id, order_id) 查询，`now > expires_at` 时返回 EXPIRED
    pub async fn get_risk(
        &self,
        merchant_id: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RiskLookupResult> {
        let Some(state) = self.store.get(merchant_id, order_id).await? else {
            return Ok(RiskLookupResult::NotFound);
        };

        Ok(if state.is_expired(now) {
            RiskLookupResult::Expired(state.into())
        } else {
            RiskLookupResult::Found(state.into())
        })
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

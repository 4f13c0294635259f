//! 风险数据来源
//!
//! 争议到达时订单/支付事件可能尚未被风险引擎处理。`RiskResolver` 按退避策略
//! 反复查询风险源，数据始终缺失时给出 UNKNOWN，由决策策略降级为 REVIEW，
//! 不会无限阻塞消费循环。风险源本身的可重试故障不降级，交由消费循环重投。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chargeflow_shared::error::PipelineError;
use chargeflow_shared::observability::metrics;
use chargeflow_shared::retry::{RetryPolicy, retry_with_policy};
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use risk_engine::store::RiskStateStore;
use risk_engine::{RiskScoreResponse, RiskStatus, RiskView};
use tracing::{debug, warn};

use crate::error::{DisputeError, Result};
use crate::model::RiskAvailability;

const RISK_ENGINE_SERVICE: &str = "risk-engine";

/// 风险源接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskSource: Send + Sync {
    /// 查询一次风险评估；尚未计算时返回 None
    async fn fetch(&self, merchant_id: &str, order_id: &str) -> Result<Option<RiskView>>;
}

// ---------------------------------------------------------------------------
// StoreRiskSource：直接读取风险状态存储
// ---------------------------------------------------------------------------

pub struct StoreRiskSource {
    store: Arc<dyn RiskStateStore>,
}

impl StoreRiskSource {
    pub fn new(store: Arc<dyn RiskStateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RiskSource for StoreRiskSource {
    async fn fetch(&self, merchant_id: &str, order_id: &str) -> Result<Option<RiskView>> {
        let state = self.store.get(merchant_id, order_id).await?;
        Ok(state.map(RiskView::from))
    }
}

// ---------------------------------------------------------------------------
// HttpRiskSource：调用风险引擎查询接口
// ---------------------------------------------------------------------------

/// 通过 `GET /risk-score/{merchantId}/{orderId}` 查询风险引擎
///
/// 404 视为尚未计算；其余 4xx 不可重试；超时与 5xx 为可重试错误。
pub struct HttpRiskSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRiskSource {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            PipelineError::Validation(format!("风险引擎地址无效 {base_url}: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| external(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn risk_score_url(&self, merchant_id: &str, order_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PipelineError::Validation("风险引擎地址不能作为基础路径".to_string()))?
            .pop_if_empty()
            .extend(["risk-score", merchant_id, order_id]);
        Ok(url)
    }
}

fn external(message: String) -> DisputeError {
    PipelineError::ExternalService {
        service: RISK_ENGINE_SERVICE.to_string(),
        message,
    }
    .into()
}

#[async_trait]
impl RiskSource for HttpRiskSource {
    async fn fetch(&self, merchant_id: &str, order_id: &str) -> Result<Option<RiskView>> {
        let url = self.risk_score_url(merchant_id, order_id)?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::ExternalServiceTimeout {
                    service: RISK_ENGINE_SERVICE.to_string(),
                }
                .into()
            } else {
                external(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: RiskScoreResponse = response
                    .json()
                    .await
                    .map_err(|e| external(format!("响应解析失败: {e}")))?;
                Ok(Some(body.risk))
            }
            status if status.is_client_error() => {
                let message = response.text().await.unwrap_or_default();
                Err(DisputeError::RiskSourceRejected {
                    status: status.as_u16(),
                    message,
                })
            }
            status => Err(external(format!("unexpected status {status}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// RiskResolver：有界重试与降级
// ---------------------------------------------------------------------------

/// 风险解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct RiskResolution {
    pub risk: Option<RiskView>,
    pub availability: RiskAvailability,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl RiskResolution {
    fn unknown(attempts: u32, last_error: Option<String>) -> Self {
        Self {
            risk: None,
            availability: RiskAvailability::Unknown,
            attempts,
            last_error,
        }
    }
}

/// 单次查询失败的原因
enum FetchFailure {
    Absent,
    Source(DisputeError),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("风险数据尚未计算"),
            Self::Source(e) => write!(f, "{e}"),
        }
    }
}

/// 根据完整度与有效期判断风险数据可信度
///
/// 过期优先；过期且不完整的数据由证据包同时标记两者。
pub fn classify(risk: &RiskView, now: DateTime<Utc>) -> RiskAvailability {
    if now > risk.expires_at {
        RiskAvailability::Stale
    } else if risk.risk_status == RiskStatus::Partial {
        RiskAvailability::Partial
    } else {
        RiskAvailability::Available
    }
}

/// 带退避重试的风险解析器
#[derive(Clone)]
pub struct RiskResolver {
    source: Arc<dyn RiskSource>,
    policy: RetryPolicy,
}

impl RiskResolver {
    pub fn new(source: Arc<dyn RiskSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// 解析 (merchant_id, order_id) 的风险数据
    ///
    /// 数据缺失或可重试错误时退避重试。数据缺失耗尽预算、或遇到不可重试错误时
    /// 返回 UNKNOWN；可重试错误耗尽预算时原样返回错误，不产生降级结论。
    pub async fn resolve(&self, merchant_id: &str, order_id: &str) -> Result<RiskResolution> {
        let mut attempts = 0u32;

        let result = retry_with_policy(
            &self.policy,
            "risk.resolve",
            |failure: &FetchFailure| match failure {
                FetchFailure::Absent => true,
                FetchFailure::Source(e) => e.is_retryable(),
            },
            || {
                attempts += 1;
                let source = self.source.clone();
                async move {
                    match source.fetch(merchant_id, order_id).await {
                        Ok(Some(risk)) => Ok(risk),
                        Ok(None) => Err(FetchFailure::Absent),
                        Err(e) => Err(FetchFailure::Source(e)),
                    }
                }
            },
        )
        .await;

        let resolution = match result {
            Ok(risk) => {
                let availability = classify(&risk, Utc::now());
                debug!(
                    merchant_id,
                    order_id,
                    attempts,
                    availability = availability.as_str(),
                    "风险数据已取得"
                );
                RiskResolution {
                    risk: Some(risk),
                    availability,
                    attempts,
                    last_error: None,
                }
            }
            Err(FetchFailure::Absent) => {
                warn!(merchant_id, order_id, attempts, "重试耗尽仍无风险数据，按风险未知处理");
                RiskResolution::unknown(attempts, None)
            }
            Err(FetchFailure::Source(e)) if e.is_retryable() => {
                warn!(merchant_id, order_id, attempts, error = %e, "风险源暂时不可用");
                metrics::record_risk_resolution(attempts, false);
                return Err(e);
            }
            Err(FetchFailure::Source(e)) => {
                warn!(merchant_id, order_id, attempts, error = %e, "风险源拒绝查询，按风险未知处理");
                RiskResolution::unknown(attempts, Some(e.to_string()))
            }
        };

        metrics::record_risk_resolution(attempts, resolution.risk.is_some());
        Ok(resolution)
    }
}

//! 争议响应服务错误类型

use chargeflow_shared::error::{PipelineError, Retryable};
use chargeflow_shared::events::EventKind;
use risk_engine::RiskError;
use thiserror::Error;

/// 争议响应服务错误
#[derive(Debug, Error)]
pub enum DisputeError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 库中的记录无法还原为处置建议
    #[error("处置建议数据损坏: {0}")]
    CorruptRecord(String),

    #[error("争议响应服务不处理该事件类型: {0}")]
    UnsupportedEvent(EventKind),

    #[error("处置建议不存在: merchant_id={merchant_id}, order_id={order_id}")]
    RecommendationNotFound {
        merchant_id: String,
        order_id: String,
    },

    /// 风险引擎以 4xx 拒绝请求，重试不会改变结果
    #[error("风险引擎拒绝请求: {status} {message}")]
    RiskSourceRejected { status: u16, message: String },

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Shared(#[from] PipelineError),
}

/// 争议响应服务 Result 类型别名
pub type Result<T> = std::result::Result<T, DisputeError>;

impl DisputeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Risk(e) => e.is_retryable(),
            Self::Shared(e) => e.is_retryable(),
            Self::Serialization(_)
            | Self::CorruptRecord(_)
            | Self::UnsupportedEvent(_)
            | Self::RecommendationNotFound { .. }
            | Self::RiskSourceRejected { .. } => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::CorruptRecord(_) => "CORRUPT_RECORD",
            Self::UnsupportedEvent(_) => "UNSUPPORTED_EVENT",
            Self::RecommendationNotFound { .. } => "RECOMMENDATION_NOT_FOUND",
            Self::RiskSourceRejected { .. } => "RISK_SOURCE_REJECTED",
            Self::Risk(e) => e.error_code(),
            Self::Shared(e) => e.code(),
        }
    }
}

impl Retryable for DisputeError {
    fn is_retryable(&self) -> bool {
        DisputeError::is_retryable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(DisputeError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(
            DisputeError::from(PipelineError::ExternalServiceTimeout {
                service: "risk-engine".into()
            })
            .is_retryable()
        );
        assert!(DisputeError::from(RiskError::Database(sqlx::Error::PoolTimedOut)).is_retryable());
        assert!(!DisputeError::UnsupportedEvent(EventKind::OrderCreated).is_retryable());
        assert!(
            !DisputeError::RiskSourceRejected {
                status: 422,
                message: String::new(),
            }
            .is_retryable()
        );
        assert!(
            !DisputeError::RecommendationNotFound {
                merchant_id: "m-1".into(),
                order_id: "ord_1".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            DisputeError::CorruptRecord("x".into()).error_code(),
            "CORRUPT_RECORD"
        );
        assert_eq!(
            DisputeError::from(PipelineError::MalformedEvent("x".into())).error_code(),
            "MALFORMED_EVENT"
        );
    }
}

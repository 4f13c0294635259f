//! 风险引擎错误类型

use chargeflow_shared::error::{PipelineError, Retryable};
use chargeflow_shared::events::EventKind;
use thiserror::Error;

/// 风险引擎错误
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 库中的记录无法还原为风险状态
    #[error("风险状态数据损坏: {0}")]
    CorruptState(String),

    /// 争议等不属于风险关联的事件被投递到风险 topic
    #[error("风险引擎不处理该事件类型: {0}")]
    UnsupportedEvent(EventKind),

    #[error(transparent)]
    Shared(#[from] PipelineError),
}

/// 风险引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, RiskError>;

impl RiskError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Shared(e) => e.is_retryable(),
            Self::Serialization(_) | Self::CorruptState(_) | Self::UnsupportedEvent(_) => false,
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::CorruptState(_) => "CORRUPT_STATE",
            Self::UnsupportedEvent(_) => "UNSUPPORTED_EVENT",
            Self::Shared(e) => e.code(),
        }
    }
}

impl Retryable for RiskError {
    fn is_retryable(&self) -> bool {
        RiskError::is_retryable(self)
    }
}

//! 统一错误处理模块
//!
//! 定义管道中各服务共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 错误按处理方式分为两类：可重试（基础设施瞬时故障）与不可重试（坏消息、参数错误）。

use thiserror::Error;

/// 管道错误类型
#[derive(Debug, Error)]
pub enum PipelineError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 事件契约错误 ====================
    #[error("事件格式无效: {0}")]
    MalformedEvent(String),

    #[error("未知事件类型: {event_type}")]
    UnknownEventType { event_type: String },

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    // ==================== 通用错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::MalformedEvent(_) => "MALFORMED_EVENT",
            Self::UnknownEventType { .. } => "UNKNOWN_EVENT_TYPE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 外部服务返回 5xx 也视为瞬时故障。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Kafka(_)
                | Self::ExternalService { .. }
                | Self::ExternalServiceTimeout { .. }
        )
    }
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::MalformedEvent(errors.to_string())
    }
}

/// 可被重试执行器与消费循环识别的错误
///
/// 各服务的错误类型实现此 trait 后即可复用共享的重试与死信逻辑。
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        PipelineError::is_retryable(self)
    }
}

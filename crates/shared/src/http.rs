//! 查询 API 的公共部件
//!
//! 统一的错误响应、路径参数校验与存活探针，风险引擎与争议响应服务共用。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// 路径参数最大长度，与表结构的 VARCHAR(255) 一致
pub const MAX_ID_LEN: usize = 255;

/// 查询 API 错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("请求参数无效: {0}")]
    InvalidRequest(String),

    #[error("记录不存在")]
    NotFound,

    /// 存储不可用等内部故障，细节只写日志
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::InvalidRequest(message) => json!({
                "status": "INVALID_REQUEST",
                "message": message,
            }),
            Self::NotFound => json!({ "status": "NOT_FOUND" }),
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "查询失败");
                json!({
                    "status": "ERROR",
                    "message": "internal error",
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

/// 校验路径中的标识符：去除首尾空白后非空且不超过 255 字符
pub fn require_id<'a>(name: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidRequest(format!("{name} must not be empty")));
    }
    if trimmed.chars().count() > MAX_ID_LEN {
        return Err(ApiError::InvalidRequest(format!(
            "{name} must be at most {MAX_ID_LEN} characters"
        )));
    }
    Ok(trimmed)
}

/// 存活探针
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// 就绪探针的响应
pub fn readiness(result: Result<(), impl std::fmt::Display>) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "就绪检查失败");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

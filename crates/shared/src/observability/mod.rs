//! 服务启动时的日志、追踪与指标初始化
//!
//! risk-engine 与 dispute-responder 在 `main` 中调用 [`init`]，持有返回的守卫直到退出。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 由服务配置注入，配置文件中不必重复
    pub service_name: String,
    /// 为空时不导出 span
    pub otlp_endpoint: Option<String>,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    /// RUST_LOG 优先
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "chargeflow".to_string(),
            otlp_endpoint: None,
            metrics_enabled: true,
            metrics_port: 9090,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 持有 tracer provider 与 Prometheus 端口，drop 时刷新 span
pub struct ObservabilityGuard {
    _metrics: Option<metrics::MetricsHandle>,
    _tracing: tracing::TracingGuard,
}

pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing = tracing::init(config)?;
    let metrics = match config.metrics_enabled {
        true => Some(metrics::init(config).await?),
        false => None,
    };

    info!(
        service = %config.service_name,
        metrics_port = config.metrics_enabled.then_some(config.metrics_port),
        otlp = config.otlp_endpoint.is_some(),
        "可观测性已初始化"
    );

    Ok(ObservabilityGuard {
        _metrics: metrics,
        _tracing: tracing,
    })
}

//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册管道指标的描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "pipeline_events_total",
        "Events handled by the pipeline, by kind and outcome"
    );
    metrics::describe_histogram!(
        "pipeline_event_duration_seconds",
        "Event handling duration in seconds"
    );

    metrics::describe_histogram!("risk_score", "Risk score after each applied merge");

    metrics::describe_counter!(
        "dispute_recommendations_total",
        "Dispute recommendations written, by action"
    );
    metrics::describe_histogram!(
        "risk_resolution_attempts",
        "Attempts needed to resolve risk at dispute time"
    );

    metrics::describe_counter!("lookups_total", "Lookup requests, by resource and status");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new().route("/metrics", get(move || std::future::ready(handle.render())));

    let listener = TcpListener::bind(addr).await?;
    info!("指标服务监听于 {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("指标服务异常: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次事件处理
///
/// outcome 取值：applied / duplicate / rejected / failed
#[inline]
pub fn record_event(kind: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "pipeline_events_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "pipeline_event_duration_seconds",
        "kind" => kind.to_string()
    )
    .record(duration_secs);
}

/// 记录合并后的风险分数
#[inline]
pub fn record_risk_score(status: &str, score: i32) {
    metrics::histogram!("risk_score", "status" => status.to_string()).record(score as f64);
}

/// 记录写入的争议建议
#[inline]
pub fn record_recommendation(action: &str, risk_availability: &str) {
    metrics::counter!(
        "dispute_recommendations_total",
        "action" => action.to_string(),
        "risk" => risk_availability.to_string()
    )
    .increment(1);
}

/// 记录争议时刻风险查询的尝试次数
#[inline]
pub fn record_risk_resolution(attempts: u32, resolved: bool) {
    metrics::histogram!(
        "risk_resolution_attempts",
        "resolved" => resolved.to_string()
    )
    .record(attempts as f64);
}

/// 记录查询接口的结果状态
#[inline]
pub fn record_lookup(resource: &str, status: &str) {
    metrics::counter!(
        "lookups_total",
        "resource" => resource.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

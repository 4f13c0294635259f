//! 风险查询 HTTP 接口

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router, middleware};
use chargeflow_shared::http::{self, ApiError, require_id};
use chargeflow_shared::observability::{metrics, middleware as obs_middleware};
use chrono::Utc;

use crate::lookup::{RiskLookup, RiskLookupResult, RiskScoreResponse};

#[derive(Clone)]
pub struct AppState {
    pub lookup: Arc<RiskLookup>,
}

/// 风险引擎完整路由：风险查询 + 探针 + 可观测性中间件
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/ready", get(readiness))
        .with_state(state.clone())
        .merge(risk_score_routes(state))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
}

/// 仅包含 `GET /risk-score/{merchantId}/{orderId}`，争议响应服务也挂载它
pub fn risk_score_routes(state: AppState) -> Router {
    Router::new()
        .route("/risk-score/{merchant_id}/{order_id}", get(get_risk_score))
        .with_state(state)
}

async fn get_risk_score(
    State(state): State<AppState>,
    Path((merchant_id, order_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let merchant_id = require_id("merchantId", &merchant_id)?;
    let order_id = require_id("orderId", &order_id)?;

    let result = state
        .lookup
        .get_risk(merchant_id, order_id, Utc::now())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    metrics::record_lookup("risk_score", result.status().as_str());

    let status = result.status();
    match result {
        RiskLookupResult::Found(risk) | RiskLookupResult::Expired(risk) => {
            Ok(Json(RiskScoreResponse { status, risk }).into_response())
        }
        RiskLookupResult::NotFound => Err(ApiError::NotFound),
    }
}

async fn readiness(State(state): State<AppState>) -> Response {
    http::readiness(state.lookup.ping().await)
}

//! 争议响应服务 HTTP 接口
//!
//! 挂载处置建议查询、管理端重算，以及与风险引擎相同的风险查询路由。

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use chargeflow_shared::http::{self, ApiError, require_id};
use chargeflow_shared::observability::{metrics, middleware as obs_middleware};
use risk_engine::LookupStatus;
use risk_engine::api::{self as risk_api, risk_score_routes};

use crate::error::DisputeError;
use crate::lookup::{RecommendationLookup, RecommendationResponse};
use crate::processor::DisputeDecisionEngine;

#[derive(Clone)]
pub struct AppState {
    pub recommendations: Arc<RecommendationLookup>,
    pub engine: Arc<DisputeDecisionEngine>,
    pub risk: risk_api::AppState,
}

pub fn router(state: AppState) -> Router {
    let risk_routes = risk_score_routes(state.risk.clone());

    Router::new()
        .route("/health", get(http::health))
        .route("/ready", get(readiness))
        .route(
            "/recommendation/{merchant_id}/{transaction_id}",
            get(get_recommendation),
        )
        .route(
            "/admin/recommendation/{merchant_id}/{order_id}/recompute",
            post(recompute),
        )
        .with_state(state)
        .merge(risk_routes)
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path((merchant_id, transaction_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let merchant_id = require_id("merchantId", &merchant_id)?;
    let reference = require_id("transactionId", &transaction_id)?;

    let found = state
        .recommendations
        .get_recommendation(merchant_id, reference)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let Some(recommendation) = found else {
        metrics::record_lookup("recommendation", LookupStatus::NotFound.as_str());
        return Err(ApiError::NotFound);
    };
    metrics::record_lookup("recommendation", LookupStatus::Found.as_str());

    Ok(Json(RecommendationResponse {
        status: LookupStatus::Found,
        recommendation,
    })
    .into_response())
}

async fn recompute(
    State(state): State<AppState>,
    Path((merchant_id, order_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let merchant_id = require_id("merchantId", &merchant_id)?;
    let order_id = require_id("orderId", &order_id)?;

    let record = state
        .engine
        .recompute(merchant_id, order_id)
        .await
        .map_err(|e| match e {
            DisputeError::RecommendationNotFound { .. } => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        })?;

    Ok(Json(RecommendationResponse {
        status: LookupStatus::Found,
        recommendation: record.into(),
    })
    .into_response())
}

async fn readiness(State(state): State<AppState>) -> Response {
    http::readiness(state.recommendations.ping().await)
}

use axum::{
    extract::{Json, Path, State},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

use super::common::into_response;
use crate::core::services::{ResetService, UsageAccountant};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DeductRequest {
    pub user_id: String,
    pub amount: i64,
}

#[derive(Deserialize)]
pub struct DeductUsageRequest {
    pub user_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct TrackRequest {
    pub user_id: String,
    pub tokens_to_add: i64,
}

/// 扣减宝石；余额不足返回 400 + 扣减前余额
pub async fn deduct_gems(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeductRequest>,
) -> Response {
    into_response(UsageAccountant::deduct(&state.db_pool, &req.user_id, req.amount).await)
}

/// 按一次交互的 token 用量换算宝石并扣减
pub async fn deduct_usage(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeductUsageRequest>,
) -> Response {
    into_response(
        UsageAccountant::deduct_usage(
            &state.db_pool,
            &req.user_id,
            req.input_tokens,
            req.output_tokens,
        )
        .await,
    )
}

/// 显式重置钱包，回满到 max_gems 并开启新窗口
pub async fn reset_gems(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetRequest>,
) -> Response {
    into_response(ResetService::reset_gems(&state.db_pool, &req.user_id).await)
}

/// token 记账
pub async fn track_tokens(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrackRequest>,
) -> Response {
    into_response(UsageAccountant::track(&state.db_pool, &req.user_id, req.tokens_to_add).await)
}

/// 合并配额状态（读取路径上自动吸收过期窗口）
pub async fn get_quota_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    into_response(ResetService::get_status(&state.db_pool, &user_id).await)
}

use axum::{
    extract::{Json, Query, State},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

use super::common::into_response;
use crate::core::services::UsageHistoryService;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub user_id: String,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Deserialize)]
pub struct PurgeRequest {
    pub user_id: String,
}

/// 用量历史分页查询
pub async fn get_usage_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let default_limit = {
        let config = state.config.read().await;
        config.history_page_size
    };

    into_response(
        UsageHistoryService::list(
            &state.db_pool,
            &query.user_id,
            query.limit.unwrap_or(default_limit),
            query.offset.unwrap_or(0),
        )
        .await,
    )
}

/// 全量清除账户数据（配额 + 历史，单事务）
pub async fn purge_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PurgeRequest>,
) -> Response {
    into_response(UsageHistoryService::purge_account(&state.db_pool, &req.user_id).await)
}

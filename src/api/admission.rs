use axum::{
    extract::{Json, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct CheckRequest {
    pub session_id: String,
}

#[derive(Deserialize)]
pub struct StartRequest {
    pub session_id: String,
    pub request_id: String,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub session_id: String,
    pub request_id: String,
    pub success: bool,
}

/// 询问当前会话是否可以发起请求
/// 这是纯咨询接口：真正的配额判定在扣减时发生
pub async fn check(State(state): State<Arc<AppState>>, Json(req): Json<CheckRequest>) -> Response {
    Json(state.admission.can_make_request(&req.session_id)).into_response()
}

/// 登记请求开始（重新校验并进入冷却）
pub async fn start(State(state): State<Arc<AppState>>, Json(req): Json<StartRequest>) -> Response {
    Json(state.admission.start_request(&req.session_id, &req.request_id)).into_response()
}

/// 登记请求结束，失败会推进熔断计数
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompleteRequest>,
) -> Response {
    Json(
        state
            .admission
            .complete_request(&req.session_id, &req.request_id, req.success),
    )
    .into_response()
}

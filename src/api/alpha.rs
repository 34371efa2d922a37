use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

use super::common::into_response;
use crate::core::services::alpha::TierSwitchRequest;
use crate::core::services::AlphaService;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// 调用者身份头（由前置网关在鉴权后注入）
const CALLER_EMAIL_HEADER: &str = "x-vitacare-user-email";

#[derive(Deserialize)]
pub struct EnrollRequest {
    pub email: String,
    pub user_id: String,
    pub code: String,
}

fn caller_email(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get(CALLER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::Unauthorized("Missing caller identity".into()))
}

fn alpha_secret(state: &AppState) -> AppResult<&str> {
    state
        .alpha_secret
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Alpha program is not enabled".into()))
}

/// 测试员登记：注册码校验通过后打标
pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnrollRequest>,
) -> Response {
    let result = async {
        let secret = alpha_secret(&state)?;
        AlphaService::enroll(&state.db_pool, secret, &req.email, &req.user_id, &req.code).await?;
        Ok(serde_json::json!({ "success": true }))
    }
    .await;

    into_response(result)
}

/// 订阅等级覆写（仅限测试员本人）
pub async fn tier_switch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TierSwitchRequest>,
) -> Response {
    let result = async {
        alpha_secret(&state)?;
        let caller = caller_email(&headers)?;
        AlphaService::tier_switch(&state.db_pool, &caller, &req).await
    }
    .await;

    into_response(result)
}

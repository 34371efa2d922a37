use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::AppResult;

/// 成功响应统一为 200 + JSON body；
/// 失败走 AppError 的状态码映射，body 为 {error}
pub fn into_response<T: Serialize>(result: AppResult<T>) -> Response {
    match result {
        Ok(data) => Json(data).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn request_logger(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();
    tracing::info!(
        "{} {} - status: {}, latency: {}ms",
        method,
        uri,
        response.status(),
        duration.as_millis()
    );
    response
}

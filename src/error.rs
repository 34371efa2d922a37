//! 错误类型定义
//! 配额操作的结构化失败结果，不跨请求边界抛异常

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// 应用错误
#[derive(Debug, Error)]
pub enum AppError {
    /// 配额不足 (携带扣减前的余额)
    #[error("Insufficient gems")]
    QuotaExhausted { remaining: i64 },

    /// 数据库读写失败
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// 身份校验失败，拒绝变更
    #[error("{0}")]
    Unauthorized(String),

    /// 记录不存在
    #[error("{0}")]
    NotFound(String),

    /// 请求参数非法
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unknown(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::QuotaExhausted { .. } => StatusCode::BAD_REQUEST,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 存储错误记录日志后以结构化结果返回
        if let AppError::StoreUnavailable(ref e) = self {
            tracing::error!("数据库操作失败: {}", e);
        }

        let body = match self {
            // 扣减失败时返回扣减前余额，前端据此展示等待提示
            AppError::QuotaExhausted { remaining } => serde_json::json!({
                "success": false,
                "error": "Insufficient gems",
                "remaining_gems": remaining,
            }),
            other => serde_json::json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

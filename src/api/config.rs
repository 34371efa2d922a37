use axum::{
    extract::{Json, State},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::core::models::AppConfig;
use crate::core::storage::ConfigStorage;
use crate::error::AppError;
use crate::state::AppState;

pub async fn load_config(State(state): State<Arc<AppState>>) -> Response {
    let config = state.config.read().await;
    Json(config.clone()).into_response()
}

/// 保存配置：落库并同步到内存中的准入控制器
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    Json(config): Json<AppConfig>,
) -> Response {
    if let Err(e) = ConfigStorage::save(&state.db_pool, &config).await {
        return AppError::Unknown(e).into_response();
    }

    state.admission.update_settings(config.admission.clone());
    state
        .sweep_enabled
        .store(config.sweep_enabled, Ordering::Relaxed);

    *state.config.write().await = config.clone();

    Json(config).into_response()
}

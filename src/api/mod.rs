use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

mod admission;
mod alpha;
pub mod common;
mod config;
mod quota;
mod usage;

pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Quota
        .route("/api/gems/deduct", post(quota::deduct_gems))
        .route("/api/gems/deduct-usage", post(quota::deduct_usage))
        .route("/api/gems/reset", post(quota::reset_gems))
        .route("/api/tokens/track", post(quota::track_tokens))
        .route("/api/quota/status/:user_id", get(quota::get_quota_status))
        // Admission (advisory)
        .route("/api/admission/check", post(admission::check))
        .route("/api/admission/start", post(admission::start))
        .route("/api/admission/complete", post(admission::complete))
        // Usage history
        .route("/api/usage/history", get(usage::get_usage_history))
        .route("/api/account/purge", post(usage::purge_account))
        // Alpha program
        .route("/api/alpha/enroll", post(alpha::enroll))
        .route("/api/alpha/tier-switch", post(alpha::tier_switch))
        // Config
        .route(
            "/api/config",
            get(config::load_config).put(config::save_config),
        )
        // Health
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

//! 核心数据模型

mod config;
mod quota;
mod tier;

pub use config::{AdmissionSettings, AppConfig};
pub use quota::{
    gems_from_tokens, DeductOutcome, GemQuota, GemStatus, QuotaStatus, TokenStatus, TokenUsage,
    TrackOutcome, GEM_WINDOW_MS, TOKENS_PER_GEM, TOKEN_LIMIT, TOKEN_TIMEOUT_MS,
};
pub use tier::SubscriptionTier;

//! 配额数据模型

use serde::{Deserialize, Serialize};

use super::SubscriptionTier;

/// 宝石窗口长度：3 小时
pub const GEM_WINDOW_MS: i64 = 3 * 60 * 60 * 1000;

/// Token 硬上限（与订阅等级无关的全局常量）
pub const TOKEN_LIMIT: i64 = 4000;

/// 触顶后的封锁时长：30 分钟
pub const TOKEN_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// 1 颗宝石兑换的 token 数
pub const TOKENS_PER_GEM: i64 = 1000;

/// token 消耗换算为宝石数，向上取整（宁可多扣不可少扣）
pub fn gems_from_tokens(input_tokens: i64, output_tokens: i64) -> i64 {
    let total = input_tokens + output_tokens;
    (total + TOKENS_PER_GEM - 1) / TOKENS_PER_GEM
}

/// 宝石配额记录（每用户一行）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GemQuota {
    pub user_id: String,
    pub current_gems: i64,
    pub max_gems: i64,
    pub subscription_tier: SubscriptionTier,
    /// 当前窗口起点（毫秒时间戳）
    pub last_reset_at: i64,
    /// 下次重置时间（毫秒时间戳）
    pub next_reset_at: i64,
}

/// Token 用量记录（每用户一行）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub user_id: String,
    pub current_tokens: i64,
    pub can_chat: bool,
    /// 触顶时间，未触顶为 None
    pub limit_reached_at: Option<i64>,
}

/// 扣减结果
#[derive(Debug, Clone, Serialize)]
pub struct DeductOutcome {
    pub success: bool,
    pub remaining_gems: i64,
}

/// Token 记账结果
#[derive(Debug, Clone, Serialize)]
pub struct TrackOutcome {
    pub success: bool,
    pub timeout_triggered: bool,
    pub current_tokens: i64,
    pub can_chat: bool,
}

/// 宝石侧状态
#[derive(Debug, Clone, Serialize)]
pub struct GemStatus {
    pub current_gems: i64,
    pub max_gems: i64,
    pub subscription_tier: SubscriptionTier,
    /// ISO-8601 字符串，便于前端直接展示
    pub next_reset_at: String,
    /// 距离下次重置的毫秒数
    pub reset_in_ms: i64,
}

/// Token 侧状态
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub current_tokens: i64,
    pub token_limit: i64,
    pub can_chat: bool,
    /// 封锁剩余毫秒数，未封锁为 0
    pub blocked_for_ms: i64,
}

/// 合并配额状态（每次准入检查前读取）
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub user_id: String,
    pub gems: GemStatus,
    pub tokens: TokenStatus,
    /// 宝石尚有余额且 token 未封锁
    pub can_chat: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gems_from_tokens_rounds_up() {
        assert_eq!(gems_from_tokens(500, 600), 2);
        assert_eq!(gems_from_tokens(1000, 0), 1);
        assert_eq!(gems_from_tokens(0, 0), 0);
        assert_eq!(gems_from_tokens(1, 0), 1);
        assert_eq!(gems_from_tokens(999, 1), 1);
        assert_eq!(gems_from_tokens(2000, 1), 3);
    }
}

//! 重置服务
//! 窗口到期判定与原子重置。重置始终写入固定目标值而非增量，
//! 因此并发下重复应用是安全的（幂等）

use sqlx::{Row, SqlitePool};

use crate::core::models::{
    GemQuota, GemStatus, QuotaStatus, SubscriptionTier, TokenStatus, TokenUsage, GEM_WINDOW_MS,
    TOKEN_LIMIT, TOKEN_TIMEOUT_MS,
};
use crate::core::services::UsageAccountant;
use crate::error::{AppError, AppResult};

/// 显式重置的返回体
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResetOutcome {
    pub success: bool,
    pub current_gems: i64,
    pub next_reset_at: String,
}

/// 重置服务
pub struct ResetService;

impl ResetService {
    /// 显式重置宝石钱包（读取 max_gems 回满，开启新窗口）
    /// 用户存在则总是成功
    pub async fn reset_gems(pool: &SqlitePool, user_id: &str) -> AppResult<ResetOutcome> {
        let now = chrono::Utc::now().timestamp_millis();

        let row = sqlx::query(
            "UPDATE gem_quotas SET
                current_gems = max_gems,
                last_reset_at = ?1,
                next_reset_at = ?2
             WHERE user_id = ?3
             RETURNING current_gems, next_reset_at",
        )
        .bind(now)
        .bind(now + GEM_WINDOW_MS)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        let row = row.ok_or_else(|| AppError::NotFound(format!("账户不存在: {}", user_id)))?;

        let current_gems: i64 = row.get("current_gems");
        let next_reset_at: i64 = row.get("next_reset_at");

        tracing::info!("用户 {} 宝石已重置为 {}", user_id, current_gems);

        Ok(ResetOutcome {
            success: true,
            current_gems,
            next_reset_at: to_rfc3339(next_reset_at),
        })
    }

    /// 惰性重置：仅当窗口已过期时生效
    /// 条件谓词保证并发下最多一个写者真正改变状态，输家观察到新状态
    pub async fn check_and_reset_gems(pool: &SqlitePool, user_id: &str) -> AppResult<bool> {
        let now = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query(
            "UPDATE gem_quotas SET
                current_gems = max_gems,
                last_reset_at = ?1,
                next_reset_at = ?2
             WHERE user_id = ?3 AND next_reset_at <= ?1",
        )
        .bind(now)
        .bind(now + GEM_WINDOW_MS)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 惰性解除 token 封锁：触顶满 30 分钟后清零并恢复聊天
    pub async fn check_and_unblock_tokens(pool: &SqlitePool, user_id: &str) -> AppResult<bool> {
        let now = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query(
            "UPDATE token_usage SET
                current_tokens = 0,
                can_chat = TRUE,
                limit_reached_at = NULL
             WHERE user_id = ?1
               AND limit_reached_at IS NOT NULL
               AND limit_reached_at + ?2 <= ?3",
        )
        .bind(user_id)
        .bind(TOKEN_TIMEOUT_MS)
        .bind(now)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!("用户 {} token 封锁已到期解除", user_id);
        }

        Ok(result.rows_affected() > 0)
    }

    /// 读取合并配额状态，入口处自动补种记录并吸收过期窗口
    /// 重置会使过期条件变为假，所以重读最多一次
    pub async fn get_status(pool: &SqlitePool, user_id: &str) -> AppResult<QuotaStatus> {
        UsageAccountant::ensure_gem_row(pool, user_id).await?;
        UsageAccountant::ensure_token_row(pool, user_id).await?;

        for _ in 0..2 {
            let now = chrono::Utc::now().timestamp_millis();

            let gems = Self::load_gem_quota(pool, user_id).await?;
            let tokens = Self::load_token_usage(pool, user_id).await?;

            // 窗口已过期：就地自愈后重读
            let gem_stale = gems.next_reset_at <= now;
            let token_stale = tokens
                .limit_reached_at
                .map(|t| t + TOKEN_TIMEOUT_MS <= now)
                .unwrap_or(false);

            if gem_stale {
                Self::check_and_reset_gems(pool, user_id).await?;
            }
            if token_stale {
                Self::check_and_unblock_tokens(pool, user_id).await?;
            }
            if gem_stale || token_stale {
                continue;
            }

            let blocked_for_ms = tokens
                .limit_reached_at
                .map(|t| (t + TOKEN_TIMEOUT_MS - now).max(0))
                .unwrap_or(0);

            return Ok(QuotaStatus {
                user_id: user_id.to_string(),
                gems: GemStatus {
                    current_gems: gems.current_gems,
                    max_gems: gems.max_gems,
                    subscription_tier: gems.subscription_tier,
                    next_reset_at: to_rfc3339(gems.next_reset_at),
                    reset_in_ms: (gems.next_reset_at - now).max(0),
                },
                tokens: TokenStatus {
                    current_tokens: tokens.current_tokens,
                    token_limit: TOKEN_LIMIT,
                    can_chat: tokens.can_chat,
                    blocked_for_ms,
                },
                can_chat: gems.current_gems > 0 && tokens.can_chat,
            });
        }

        // 重置把过期条件置为假，重读一次必然收敛；
        // 走到这里只可能是系统时钟大幅倒退
        Err(AppError::Unknown(format!(
            "配额状态读取未收敛: {}",
            user_id
        )))
    }

    /// 加载宝石配额记录
    pub async fn load_gem_quota(pool: &SqlitePool, user_id: &str) -> AppResult<GemQuota> {
        let row = sqlx::query(
            "SELECT user_id, current_gems, max_gems, subscription_tier, last_reset_at, next_reset_at
             FROM gem_quotas WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let tier: Option<String> = row.get("subscription_tier");

        Ok(GemQuota {
            user_id: row.get("user_id"),
            current_gems: row.get("current_gems"),
            max_gems: row.get("max_gems"),
            subscription_tier: SubscriptionTier::parse_or_basic(tier.as_deref()),
            last_reset_at: row.get("last_reset_at"),
            next_reset_at: row.get("next_reset_at"),
        })
    }

    /// 加载 token 用量记录
    pub async fn load_token_usage(pool: &SqlitePool, user_id: &str) -> AppResult<TokenUsage> {
        let row = sqlx::query(
            "SELECT user_id, current_tokens, can_chat, limit_reached_at
             FROM token_usage WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(TokenUsage {
            user_id: row.get("user_id"),
            current_tokens: row.get("current_tokens"),
            can_chat: row.get("can_chat"),
            limit_reached_at: row.get("limit_reached_at"),
        })
    }

    /// 巡检：重置所有已过期的宝石窗口，返回受影响的用户
    pub async fn sweep_elapsed_windows(pool: &SqlitePool) -> AppResult<Vec<String>> {
        let now = chrono::Utc::now().timestamp_millis();

        let rows = sqlx::query(
            "UPDATE gem_quotas SET
                current_gems = max_gems,
                last_reset_at = ?1,
                next_reset_at = ?2
             WHERE next_reset_at <= ?1
             RETURNING user_id",
        )
        .bind(now)
        .bind(now + GEM_WINDOW_MS)
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }
}

fn to_rfc3339(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::init_test_db;
    use crate::core::services::UsageAccountant;

    async fn age_gem_window(pool: &SqlitePool, user_id: &str, past_ms: i64) {
        // 把窗口终点挪到过去，模拟已过期的窗口
        sqlx::query("UPDATE gem_quotas SET next_reset_at = ?1 WHERE user_id = ?2")
            .bind(chrono::Utc::now().timestamp_millis() - past_ms)
            .bind(user_id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_elapsed_window_refills_on_status_read() {
        let pool = init_test_db().await;

        UsageAccountant::deduct(&pool, "u1", 30).await.unwrap();
        age_gem_window(&pool, "u1", 1000).await;

        let status = ResetService::get_status(&pool, "u1").await.unwrap();
        assert_eq!(status.gems.current_gems, status.gems.max_gems);
        assert!(status.gems.reset_in_ms > 0);
        assert!(status.can_chat);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let pool = init_test_db().await;

        UsageAccountant::deduct(&pool, "u1", 10).await.unwrap();

        let first = ResetService::reset_gems(&pool, "u1").await.unwrap();
        let second = ResetService::reset_gems(&pool, "u1").await.unwrap();

        assert_eq!(first.current_gems, 50);
        assert_eq!(second.current_gems, 50);
    }

    #[tokio::test]
    async fn test_reset_unknown_user_is_not_found() {
        let pool = init_test_db().await;

        let err = ResetService::reset_gems(&pool, "ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_token_block_clears_after_timeout() {
        let pool = init_test_db().await;

        let out = UsageAccountant::track(&pool, "u1", 4100).await.unwrap();
        assert!(out.timeout_triggered);
        assert!(!out.can_chat);

        // 把触顶时间挪到 31 分钟前
        sqlx::query("UPDATE token_usage SET limit_reached_at = ?1 WHERE user_id = ?2")
            .bind(chrono::Utc::now().timestamp_millis() - 31 * 60 * 1000)
            .bind("u1")
            .execute(&pool)
            .await
            .unwrap();

        let status = ResetService::get_status(&pool, "u1").await.unwrap();
        assert!(status.tokens.can_chat);
        assert_eq!(status.tokens.current_tokens, 0);
        assert_eq!(status.tokens.blocked_for_ms, 0);
    }

    #[tokio::test]
    async fn test_sweep_resets_all_elapsed_windows() {
        let pool = init_test_db().await;

        UsageAccountant::deduct(&pool, "u1", 20).await.unwrap();
        UsageAccountant::deduct(&pool, "u2", 20).await.unwrap();
        UsageAccountant::deduct(&pool, "u3", 20).await.unwrap();
        age_gem_window(&pool, "u1", 1000).await;
        age_gem_window(&pool, "u2", 1000).await;

        let mut reset = ResetService::sweep_elapsed_windows(&pool).await.unwrap();
        reset.sort();
        assert_eq!(reset, vec!["u1".to_string(), "u2".to_string()]);

        // 未过期的不受影响
        let status = ResetService::get_status(&pool, "u3").await.unwrap();
        assert_eq!(status.gems.current_gems, 30);
    }
}

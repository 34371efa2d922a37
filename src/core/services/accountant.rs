//! 用量记账服务
//! 宝石扣减与 token 记账，全部通过单条原子 UPDATE 完成
//! 禁止读出-计算-写回：同一用户可能从多个设备并发请求

use sqlx::{Row, SqlitePool};

use crate::core::models::{
    gems_from_tokens, DeductOutcome, SubscriptionTier, TrackOutcome, GEM_WINDOW_MS, TOKEN_LIMIT,
};
use crate::core::services::history::{HistoryKind, UsageHistoryService};
use crate::error::{AppError, AppResult};

/// 用量记账服务
pub struct UsageAccountant;

impl UsageAccountant {
    /// 懒创建宝石配额行（首次使用时，默认 basic 等级、满钱包）
    pub async fn ensure_gem_row(pool: &SqlitePool, user_id: &str) -> AppResult<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let tier = SubscriptionTier::Basic;

        sqlx::query(
            "INSERT INTO gem_quotas (user_id, current_gems, max_gems, subscription_tier, last_reset_at, next_reset_at)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(tier.max_gems())
        .bind(tier.as_str())
        .bind(now)
        .bind(now + GEM_WINDOW_MS)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// 懒创建 token 用量行
    pub async fn ensure_token_row(pool: &SqlitePool, user_id: &str) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO token_usage (user_id, current_tokens, can_chat, limit_reached_at)
             VALUES (?1, 0, TRUE, NULL)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// 扣减宝石
    /// 余额不足时不做任何变更，返回扣减前余额（fail closed）
    pub async fn deduct(
        pool: &SqlitePool,
        user_id: &str,
        amount: i64,
    ) -> AppResult<DeductOutcome> {
        if amount < 0 {
            return Err(AppError::InvalidInput("amount must be non-negative".into()));
        }

        let remaining = Self::debit_gems(pool, user_id, amount).await?;

        UsageHistoryService::record(pool, user_id, HistoryKind::GemDeduct, amount, 0, 0, remaining)
            .await;

        Ok(DeductOutcome {
            success: true,
            remaining_gems: remaining,
        })
    }

    /// 按一次 AI 交互的 token 用量扣减宝石
    pub async fn deduct_usage(
        pool: &SqlitePool,
        user_id: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> AppResult<DeductOutcome> {
        if input_tokens < 0 || output_tokens < 0 {
            return Err(AppError::InvalidInput(
                "token counts must be non-negative".into(),
            ));
        }

        let amount = gems_from_tokens(input_tokens, output_tokens);
        let remaining = Self::debit_gems(pool, user_id, amount).await?;

        UsageHistoryService::record(
            pool,
            user_id,
            HistoryKind::GemDeduct,
            amount,
            input_tokens,
            output_tokens,
            remaining,
        )
        .await;

        Ok(DeductOutcome {
            success: true,
            remaining_gems: remaining,
        })
    }

    /// 单条条件更新完成扣减：余额足够才会命中，否则零行受影响
    async fn debit_gems(pool: &SqlitePool, user_id: &str, amount: i64) -> AppResult<i64> {
        Self::ensure_gem_row(pool, user_id).await?;

        let row = sqlx::query(
            "UPDATE gem_quotas SET current_gems = current_gems - ?1
             WHERE user_id = ?2 AND current_gems >= ?1
             RETURNING current_gems",
        )
        .bind(amount)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        match row {
            Some(row) => Ok(row.get("current_gems")),
            None => {
                // 扣减失败：读取当前余额供前端展示
                let remaining: i64 =
                    sqlx::query("SELECT current_gems FROM gem_quotas WHERE user_id = ?1")
                        .bind(user_id)
                        .fetch_one(pool)
                        .await?
                        .get("current_gems");

                tracing::info!("用户 {} 宝石不足: 余额 {}, 需要 {}", user_id, remaining, amount);

                Err(AppError::QuotaExhausted { remaining })
            }
        }
    }

    /// token 记账（只增不减）
    /// 首次越过上限时在同一条原子更新内翻转 can_chat 并盖上触顶时间戳，
    /// 该转换是单向的，直到超时重置
    pub async fn track(
        pool: &SqlitePool,
        user_id: &str,
        tokens_to_add: i64,
    ) -> AppResult<TrackOutcome> {
        if tokens_to_add < 0 {
            return Err(AppError::InvalidInput(
                "tokens_to_add must be non-negative".into(),
            ));
        }

        Self::ensure_token_row(pool, user_id).await?;

        let now = chrono::Utc::now().timestamp_millis();

        // SET 表达式中引用的列均为更新前的旧值，
        // 因此 limit_reached_at 只在 can_chat 由 1 变 0 的那次更新中被盖章
        let row = sqlx::query(
            "UPDATE token_usage SET
                current_tokens = current_tokens + ?1,
                can_chat = CASE WHEN current_tokens + ?1 >= ?2 THEN FALSE ELSE can_chat END,
                limit_reached_at = CASE WHEN current_tokens + ?1 >= ?2 AND can_chat THEN ?3 ELSE limit_reached_at END
             WHERE user_id = ?4
             RETURNING current_tokens, can_chat, limit_reached_at",
        )
        .bind(tokens_to_add)
        .bind(TOKEN_LIMIT)
        .bind(now)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let current_tokens: i64 = row.get("current_tokens");
        let can_chat: bool = row.get("can_chat");

        // 本次调用触发封锁，当且仅当总量是在这次更新中越过上限的
        let timeout_triggered =
            current_tokens >= TOKEN_LIMIT && current_tokens - tokens_to_add < TOKEN_LIMIT;

        if timeout_triggered {
            tracing::warn!(
                "用户 {} token 触顶: {} / {}，进入封锁",
                user_id,
                current_tokens,
                TOKEN_LIMIT
            );
        }

        UsageHistoryService::record(
            pool,
            user_id,
            HistoryKind::TokenTrack,
            tokens_to_add,
            0,
            0,
            current_tokens,
        )
        .await;

        Ok(TrackOutcome {
            success: true,
            timeout_triggered,
            current_tokens,
            can_chat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::init_test_db;

    #[tokio::test]
    async fn test_deduct_success_and_remaining() {
        let pool = init_test_db().await;

        let out = UsageAccountant::deduct(&pool, "u1", 5).await.unwrap();
        assert!(out.success);
        assert_eq!(out.remaining_gems, 45); // basic 默认 50

        let out = UsageAccountant::deduct(&pool, "u1", 45).await.unwrap();
        assert!(out.success);
        assert_eq!(out.remaining_gems, 0);
    }

    #[tokio::test]
    async fn test_deduct_insufficient_leaves_state_unchanged() {
        let pool = init_test_db().await;

        // 扣到只剩 3
        UsageAccountant::deduct(&pool, "u1", 47).await.unwrap();

        let err = UsageAccountant::deduct(&pool, "u1", 5).await.unwrap_err();
        match err {
            AppError::QuotaExhausted { remaining } => assert_eq!(remaining, 3),
            other => panic!("unexpected error: {:?}", other),
        }

        // 失败不产生变更
        let out = UsageAccountant::deduct(&pool, "u1", 3).await.unwrap();
        assert!(out.success);
        assert_eq!(out.remaining_gems, 0);
    }

    #[tokio::test]
    async fn test_deduct_usage_converts_and_debits() {
        let pool = init_test_db().await;

        // 1100 tokens 向上取整为 2 颗宝石
        let out = UsageAccountant::deduct_usage(&pool, "u1", 500, 600)
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.remaining_gems, 48);

        // 0 token 的交互不计费
        let out = UsageAccountant::deduct_usage(&pool, "u1", 0, 0).await.unwrap();
        assert_eq!(out.remaining_gems, 48);
    }

    #[tokio::test]
    async fn test_deduct_zero_is_a_noop_read() {
        let pool = init_test_db().await;

        let out = UsageAccountant::deduct(&pool, "u1", 0).await.unwrap();
        assert!(out.success);
        assert_eq!(out.remaining_gems, 50);
    }

    #[tokio::test]
    async fn test_track_flips_can_chat_once() {
        let pool = init_test_db().await;

        // 3950 tokens，尚可聊天
        let out = UsageAccountant::track(&pool, "u1", 3950).await.unwrap();
        assert!(out.success);
        assert!(!out.timeout_triggered);
        assert!(out.can_chat);
        assert_eq!(out.current_tokens, 3950);

        // +100 越过 4000，本次触发封锁
        let out = UsageAccountant::track(&pool, "u1", 100).await.unwrap();
        assert!(out.success);
        assert!(out.timeout_triggered);
        assert!(!out.can_chat);
        assert_eq!(out.current_tokens, 4050);

        // 再记账不会重复触发
        let out = UsageAccountant::track(&pool, "u1", 10).await.unwrap();
        assert!(out.success);
        assert!(!out.timeout_triggered);
        assert!(!out.can_chat);
        assert_eq!(out.current_tokens, 4060);
    }
}

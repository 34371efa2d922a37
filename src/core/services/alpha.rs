//! 内测计划服务
//! 注册码校验、测试员标记、订阅等级覆写
//! 覆写仅限已登记的测试员账户，且调用者身份必须与目标邮箱一致

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::core::models::{SubscriptionTier, GEM_WINDOW_MS};
use crate::error::{AppError, AppResult};

/// 等级覆写请求
#[derive(Debug, Deserialize)]
pub struct TierSwitchRequest {
    pub email: String,
    pub subscribed: bool,
    pub subscription_tier: Option<SubscriptionTier>,
    /// ISO-8601，订阅到期时间
    pub subscription_end: Option<String>,
}

/// 等级覆写结果
#[derive(Debug, Serialize)]
pub struct TierSwitchOutcome {
    pub success: bool,
    pub user_id: String,
    pub subscription_tier: SubscriptionTier,
    pub max_gems: i64,
}

/// 内测计划服务
pub struct AlphaService;

impl AlphaService {
    /// 注册码 = SHA-256(email + ":" + 共享密钥) 的十六进制
    pub fn enrollment_code(email: &str, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(email.as_bytes());
        hasher.update(b":");
        hasher.update(secret.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// 登记测试员：校验注册码后写入标记
    pub async fn enroll(
        pool: &SqlitePool,
        secret: &str,
        email: &str,
        user_id: &str,
        code: &str,
    ) -> AppResult<()> {
        let expected = Self::enrollment_code(email, secret);
        if !expected.eq_ignore_ascii_case(code.trim()) {
            tracing::warn!("邮箱 {} 的注册码校验失败", email);
            return Err(AppError::Unauthorized("Invalid enrollment code".into()));
        }

        sqlx::query(
            "INSERT INTO alpha_testers (email, user_id, enrolled_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(email) DO UPDATE SET user_id = excluded.user_id",
        )
        .bind(email)
        .bind(user_id)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(pool)
        .await?;

        tracing::info!("测试员登记成功: {}", email);
        Ok(())
    }

    /// 订阅等级覆写
    /// 调整 max_gems 与订阅字段，但从不直接改动 current_gems，
    /// 新上限在下一次窗口重置时生效为回满目标
    pub async fn tier_switch(
        pool: &SqlitePool,
        caller_email: &str,
        req: &TierSwitchRequest,
    ) -> AppResult<TierSwitchOutcome> {
        // 1. 身份校验：调用者必须就是目标账户
        if !caller_email.eq_ignore_ascii_case(&req.email) {
            return Err(AppError::Unauthorized(
                "Caller identity does not match target account".into(),
            ));
        }

        // 2. 仅限已登记的测试员
        let tester = sqlx::query("SELECT user_id FROM alpha_testers WHERE email = ?1")
            .bind(&req.email)
            .fetch_optional(pool)
            .await?;

        let user_id: String = match tester {
            Some(row) => row.get("user_id"),
            None => {
                return Err(AppError::Unauthorized(
                    "Account is not enrolled in the alpha program".into(),
                ))
            }
        };

        // 3. 计算目标等级：退订一律回到 basic
        let tier = if req.subscribed {
            req.subscription_tier.unwrap_or_default()
        } else {
            SubscriptionTier::Basic
        };

        let subscription_end = match &req.subscription_end {
            Some(s) => Some(
                chrono::DateTime::parse_from_rfc3339(s)
                    .map_err(|e| AppError::InvalidInput(format!("无效的到期时间: {}", e)))?
                    .timestamp_millis(),
            ),
            None => None,
        };

        // 4. 写入：目标行不存在时先按新等级补种
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO gem_quotas
                (user_id, current_gems, max_gems, subscription_tier, last_reset_at, next_reset_at, subscribed, subscription_end)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
                subscription_tier = excluded.subscription_tier,
                max_gems = excluded.max_gems,
                subscribed = excluded.subscribed,
                subscription_end = excluded.subscription_end",
        )
        .bind(&user_id)
        .bind(tier.max_gems())
        .bind(tier.as_str())
        .bind(now)
        .bind(now + GEM_WINDOW_MS)
        .bind(req.subscribed)
        .bind(subscription_end)
        .execute(pool)
        .await?;

        tracing::info!(
            "测试员 {} 订阅等级切换为 {} (max_gems={})",
            req.email,
            tier.as_str(),
            tier.max_gems()
        );

        Ok(TierSwitchOutcome {
            success: true,
            user_id,
            subscription_tier: tier,
            max_gems: tier.max_gems(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::init_test_db;
    use crate::core::services::UsageAccountant;

    const SECRET: &str = "test-secret";

    async fn enroll(pool: &SqlitePool, email: &str, user_id: &str) {
        let code = AlphaService::enrollment_code(email, SECRET);
        AlphaService::enroll(pool, SECRET, email, user_id, &code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_enroll_rejects_bad_code() {
        let pool = init_test_db().await;

        let err = AlphaService::enroll(&pool, SECRET, "a@x.io", "u1", "deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_tier_switch_requires_matching_identity() {
        let pool = init_test_db().await;
        enroll(&pool, "a@x.io", "u1").await;

        let req = TierSwitchRequest {
            email: "a@x.io".into(),
            subscribed: true,
            subscription_tier: Some(SubscriptionTier::Pro),
            subscription_end: None,
        };

        let err = AlphaService::tier_switch(&pool, "b@x.io", &req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_tier_switch_rejects_non_testers() {
        let pool = init_test_db().await;

        let req = TierSwitchRequest {
            email: "a@x.io".into(),
            subscribed: true,
            subscription_tier: Some(SubscriptionTier::Pro),
            subscription_end: None,
        };

        let err = AlphaService::tier_switch(&pool, "a@x.io", &req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_tier_switch_never_touches_current_gems() {
        let pool = init_test_db().await;
        enroll(&pool, "a@x.io", "u1").await;

        // 先消费一些，余额 40
        UsageAccountant::deduct(&pool, "u1", 10).await.unwrap();

        let req = TierSwitchRequest {
            email: "a@x.io".into(),
            subscribed: true,
            subscription_tier: Some(SubscriptionTier::Enterprise),
            subscription_end: Some("2026-12-31T00:00:00Z".into()),
        };

        let out = AlphaService::tier_switch(&pool, "a@x.io", &req)
            .await
            .unwrap();
        assert_eq!(out.max_gems, 500);

        let row = sqlx::query("SELECT current_gems, max_gems FROM gem_quotas WHERE user_id = 'u1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        // 余额保持不变，上限已抬高
        assert_eq!(row.get::<i64, _>("current_gems"), 40);
        assert_eq!(row.get::<i64, _>("max_gems"), 500);
    }
}

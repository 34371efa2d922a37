//! 用量历史服务
//! 每次扣减/记账落一行，供前端用量面板分页查询；
//! 账户清除时与配额记录同一事务删除

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::AppResult;

/// 历史条目类型
#[derive(Debug, Clone, Copy)]
pub enum HistoryKind {
    GemDeduct,
    TokenTrack,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::GemDeduct => "gem_deduct",
            HistoryKind::TokenTrack => "token_track",
        }
    }
}

/// 用量历史条目
#[derive(Debug, Clone, Serialize)]
pub struct UsageHistoryEntry {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub amount: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub balance_after: i64,
    pub created_at: i64,
}

/// 账户清除结果
#[derive(Debug, Clone, Serialize)]
pub struct PurgeOutcome {
    pub success: bool,
    pub quota_rows: u64,
    pub history_rows: u64,
}

/// 用量历史服务
pub struct UsageHistoryService;

impl UsageHistoryService {
    /// 记录一条历史（尽力而为：失败只记日志，不影响主操作）
    pub async fn record(
        pool: &SqlitePool,
        user_id: &str,
        kind: HistoryKind,
        amount: i64,
        tokens_in: i64,
        tokens_out: i64,
        balance_after: i64,
    ) {
        let result = sqlx::query(
            "INSERT INTO usage_history
                (id, user_id, kind, amount, tokens_in, tokens_out, balance_after, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(kind.as_str())
        .bind(amount)
        .bind(tokens_in)
        .bind(tokens_out)
        .bind(balance_after)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("写入用量历史失败: {}", e);
        }
    }

    /// 分页查询（最新的在前）
    pub async fn list(
        pool: &SqlitePool,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<UsageHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, amount, tokens_in, tokens_out, balance_after, created_at
             FROM usage_history
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| UsageHistoryEntry {
                id: row.get("id"),
                user_id: row.get("user_id"),
                kind: row.get("kind"),
                amount: row.get("amount"),
                tokens_in: row.get("tokens_in"),
                tokens_out: row.get("tokens_out"),
                balance_after: row.get("balance_after"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// 全量清除账户数据：配额、token、测试员标记、历史，单事务完成
    pub async fn purge_account(pool: &SqlitePool, user_id: &str) -> AppResult<PurgeOutcome> {
        let mut tx = pool.begin().await?;

        let gems = sqlx::query("DELETE FROM gem_quotas WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let tokens = sqlx::query("DELETE FROM token_usage WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM alpha_testers WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let history = sqlx::query("DELETE FROM usage_history WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "账户 {} 数据已清除: 配额 {} 行, 历史 {} 行",
            user_id,
            gems.rows_affected() + tokens.rows_affected(),
            history.rows_affected()
        );

        Ok(PurgeOutcome {
            success: true,
            quota_rows: gems.rows_affected() + tokens.rows_affected(),
            history_rows: history.rows_affected(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::init_test_db;
    use crate::core::services::UsageAccountant;

    #[tokio::test]
    async fn test_history_records_and_pages() {
        let pool = init_test_db().await;

        UsageAccountant::deduct(&pool, "u1", 1).await.unwrap();
        UsageAccountant::deduct(&pool, "u1", 2).await.unwrap();
        UsageAccountant::track(&pool, "u1", 300).await.unwrap();

        let all = UsageHistoryService::list(&pool, "u1", 10, 0).await.unwrap();
        assert_eq!(all.len(), 3);

        let page = UsageHistoryService::list(&pool, "u1", 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_purge_removes_everything_for_one_user() {
        let pool = init_test_db().await;

        UsageAccountant::deduct(&pool, "u1", 5).await.unwrap();
        UsageAccountant::track(&pool, "u1", 100).await.unwrap();
        UsageAccountant::deduct(&pool, "u2", 5).await.unwrap();

        let out = UsageHistoryService::purge_account(&pool, "u1").await.unwrap();
        assert!(out.success);
        assert_eq!(out.quota_rows, 2);
        assert_eq!(out.history_rows, 2);

        // 其他用户不受影响
        let rest = UsageHistoryService::list(&pool, "u2", 10, 0).await.unwrap();
        assert_eq!(rest.len(), 1);
    }
}

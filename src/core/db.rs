use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

pub async fn init_db(data_dir: &Path) -> Result<SqlitePool, String> {
    let db_path = data_dir.join("vitacare.db");
    let db_url = format!("sqlite:{}", db_path.to_string_lossy());

    let options = SqliteConnectOptions::from_str(&db_url)
        .map_err(|e| e.to_string())?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| format!("Failed to connect to database: {}", e))?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// 测试用内存数据库
#[cfg(test)]
pub async fn init_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    run_migrations(&pool).await.expect("migrations failed");
    pool
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), String> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS gem_quotas (
            user_id TEXT PRIMARY KEY,
            current_gems INTEGER NOT NULL,
            max_gems INTEGER NOT NULL,
            subscription_tier TEXT NOT NULL DEFAULT 'basic',
            last_reset_at INTEGER NOT NULL,
            next_reset_at INTEGER NOT NULL
        );",
    )
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to create gem_quotas table: {}", e))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS token_usage (
            user_id TEXT PRIMARY KEY,
            current_tokens INTEGER NOT NULL DEFAULT 0,
            can_chat BOOLEAN NOT NULL DEFAULT TRUE,
            limit_reached_at INTEGER
        );",
    )
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to create token_usage table: {}", e))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS usage_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            amount INTEGER NOT NULL,
            tokens_in INTEGER NOT NULL DEFAULT 0,
            tokens_out INTEGER NOT NULL DEFAULT 0,
            balance_after INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );",
    )
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to create usage_history table: {}", e))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_usage_history_user
         ON usage_history (user_id, created_at);",
    )
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to create usage_history index: {}", e))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS alpha_testers (
            email TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            enrolled_at INTEGER NOT NULL
        );",
    )
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to create alpha_testers table: {}", e))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS configs (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to create configs table: {}", e))?;

    // Add new columns if they don't exist
    let new_columns = [
        ("subscribed", "BOOLEAN DEFAULT FALSE"),
        ("subscription_end", "INTEGER"),
    ];

    for (name, col_type) in new_columns {
        let _ = sqlx::query(&format!(
            "ALTER TABLE gem_quotas ADD COLUMN {} {}",
            name, col_type
        ))
        .execute(pool)
        .await;
    }

    Ok(())
}

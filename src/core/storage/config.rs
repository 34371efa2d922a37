//! 配置存储服务
//! 使用 SQLite 数据库持久化配置

use crate::core::models::AppConfig;
use sqlx::SqlitePool;

/// 配置存储服务
pub struct ConfigStorage;

impl ConfigStorage {
    /// 加载应用配置
    /// 数据库没有记录时返回默认值，但不隐式写回——只有显式保存才落库
    pub async fn load(pool: &SqlitePool) -> Result<AppConfig, String> {
        let row = sqlx::query("SELECT value FROM configs WHERE key = 'app_config'")
            .fetch_optional(pool)
            .await
            .map_err(|e| format!("Failed to fetch config from DB: {}", e))?;

        if let Some(row) = row {
            use sqlx::Row;
            let value: String = row.get("value");
            let config: AppConfig = serde_json::from_str(&value)
                .map_err(|e| format!("Failed to parse config from DB: {}", e))?;
            return Ok(config);
        }

        Ok(AppConfig::default())
    }

    /// 保存应用配置到数据库
    pub async fn save(pool: &SqlitePool, config: &AppConfig) -> Result<(), String> {
        let content =
            serde_json::to_string_pretty(config).map_err(|e| format!("序列化配置失败: {}", e))?;

        sqlx::query(
            "INSERT INTO configs (key, value) VALUES ('app_config', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(content)
        .execute(pool)
        .await
        .map_err(|e| format!("Failed to save config to DB: {}", e))?;

        Ok(())
    }
}

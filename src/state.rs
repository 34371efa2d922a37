use crate::core::models::AppConfig;
use crate::core::storage::ConfigStorage;
use crate::core::traits::{DefaultStorageConfig, StorageConfig};
use crate::guard::AdmissionController;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Web 应用状态
pub struct AppState {
    pub storage: DefaultStorageConfig,
    pub db_pool: sqlx::SqlitePool,
    pub admission: Arc<AdmissionController>,
    pub config: RwLock<AppConfig>,
    pub sweep_enabled: AtomicBool,
    /// 内测注册码共享密钥（环境变量注入，缺失则关闭内测接口）
    pub alpha_secret: Option<String>,
}

impl AppState {
    pub async fn new() -> Result<Self, String> {
        let storage = DefaultStorageConfig::new()?;
        Self::build(storage).await
    }

    pub async fn with_data_dir(data_dir: std::path::PathBuf) -> Result<Self, String> {
        let storage = DefaultStorageConfig::with_path(data_dir)?;
        Self::build(storage).await
    }

    async fn build(storage: DefaultStorageConfig) -> Result<Self, String> {
        let db_pool = crate::core::db::init_db(&storage.data_dir()).await?;

        // 配置生命周期：启动时加载一次，只有显式保存才写回
        let config = ConfigStorage::load(&db_pool).await?;

        let admission = Arc::new(AdmissionController::new(config.admission.clone()));
        let sweep_enabled = AtomicBool::new(config.sweep_enabled);
        let alpha_secret = std::env::var("VITACARE_ALPHA_SECRET").ok();

        if alpha_secret.is_none() {
            tracing::warn!("VITACARE_ALPHA_SECRET 未设置，内测接口将拒绝所有请求");
        }

        Ok(Self {
            storage,
            db_pool,
            admission,
            config: RwLock::new(config),
            sweep_enabled,
            alpha_secret,
        })
    }
}

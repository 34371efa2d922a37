//! 核心 trait 定义
//! 抽象数据目录，便于测试与容器部署时替换路径

use std::path::PathBuf;

/// 存储配置 trait
pub trait StorageConfig: Send + Sync {
    /// 获取数据目录路径
    fn data_dir(&self) -> PathBuf;
}

/// 默认存储配置 (使用 ~/.vitacare_server/)
pub struct DefaultStorageConfig {
    data_dir: PathBuf,
}

impl DefaultStorageConfig {
    pub fn new() -> Result<Self, String> {
        let home = dirs::home_dir().ok_or_else(|| "无法获取用户主目录".to_string())?;
        let data_dir = home.join(".vitacare_server");

        std::fs::create_dir_all(&data_dir).map_err(|e| format!("创建数据目录失败: {}", e))?;

        Ok(Self { data_dir })
    }

    /// 从指定路径创建
    pub fn with_path(data_dir: PathBuf) -> Result<Self, String> {
        std::fs::create_dir_all(&data_dir).map_err(|e| format!("创建数据目录失败: {}", e))?;

        Ok(Self { data_dir })
    }
}

impl StorageConfig for DefaultStorageConfig {
    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}

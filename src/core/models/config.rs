//! 应用配置模型
//! 配置在启动时从数据库加载，仅在显式保存时写回，不做隐式默认写入

use serde::{Deserialize, Serialize};

/// 准入控制参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// 两次请求之间的冷却时间（毫秒）
    pub cooldown_ms: i64,
    /// 单会话并发请求上限
    pub max_concurrent_requests: usize,
    /// 熔断阈值：窗口内连续失败次数
    pub failure_threshold: u32,
    /// 失败计数窗口（毫秒）
    pub failure_window_ms: i64,
    /// 熔断持续时间（毫秒）
    pub circuit_open_ms: i64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: 3000,
            max_concurrent_requests: 3,
            failure_threshold: 5,
            failure_window_ms: 5 * 60 * 1000,
            circuit_open_ms: 15 * 60 * 1000,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub admission: AdmissionSettings,
    /// 是否启用后台重置巡检
    pub sweep_enabled: bool,
    /// 巡检间隔（秒）
    pub sweep_interval_secs: u64,
    /// 用量历史默认分页大小
    pub history_page_size: usize,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            admission: AdmissionSettings::default(),
            sweep_enabled: true,
            sweep_interval_secs: 600,
            history_page_size: 50,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

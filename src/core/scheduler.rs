use crate::core::services::ResetService;
use crate::state::AppState;
use chrono::Utc;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::time::{self, Duration};
use tracing::{debug, info};

// 巡检历史：key = user_id, value = 最近一次由巡检重置的时间戳
// 用于避免同一窗口内重复刷日志
static SWEEP_HISTORY: Lazy<Mutex<HashMap<String, i64>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn start_scheduler(state: Arc<AppState>) {
    tokio::spawn(async move {
        let interval_secs = {
            let config = state.config.read().await;
            config.sweep_interval_secs.max(60)
        };

        info!("Reset sweep scheduler started. Scanning for elapsed quota windows...");

        let mut interval = time::interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            let sweep_enabled = state
                .sweep_enabled
                .load(std::sync::atomic::Ordering::Relaxed);

            if !sweep_enabled {
                continue;
            }

            // 巡检所有已过期的宝石窗口，重置与惰性路径共用同一条幂等语句
            let reset_users = match ResetService::sweep_elapsed_windows(&state.db_pool).await {
                Ok(users) => users,
                Err(e) => {
                    debug!("Sweep failed (will retry next tick): {}", e);
                    continue;
                }
            };

            if reset_users.is_empty() {
                continue;
            }

            let now_ts = Utc::now().timestamp_millis();

            {
                let mut history = SWEEP_HISTORY.lock().unwrap();
                for user_id in &reset_users {
                    if history.insert(user_id.clone(), now_ts).is_none() {
                        info!("[Sweep] ✓ Refilled wallet for {}", user_id);
                    }
                }
            }

            info!(
                "[Sweep] {} elapsed window(s) reset to full",
                reset_users.len()
            );

            // 定期清理历史记录（保留最近 24 小时）
            {
                let mut history = SWEEP_HISTORY.lock().unwrap();
                let cutoff = now_ts - 86_400_000;
                history.retain(|_, &mut ts| ts > cutoff);
            }
        }
    });
}

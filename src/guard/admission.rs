//! 准入控制器
//! 会话级的咨询式限流：冷却、并发上限、失败熔断
//! 只保护用户体验、避免请求风暴，不替代服务端配额判定——
//! 配额是否存在以记账服务的原子更新为准

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::RwLock;

use crate::core::models::AdmissionSettings;

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// 熔断中
    CircuitOpen,
    /// 冷却中
    Cooldown,
    /// 并发请求达到上限
    TooManyInFlight,
}

/// 准入判定
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    /// 距离条件可能变化的等待毫秒数
    pub wait_ms: i64,
}

impl AdmissionDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            wait_ms: 0,
        }
    }

    fn deny(reason: DenyReason, wait_ms: i64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            wait_ms: wait_ms.max(1),
        }
    }
}

/// 请求完成后的会话侧状态
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompletionOutcome {
    pub failure_count: u32,
    pub circuit_open: bool,
    /// 熔断剩余毫秒数，未熔断为 0
    pub blocked_for_ms: i64,
}

/// 单个会话的准入状态（进程内，重启即清零）
#[derive(Debug, Default)]
struct SessionState {
    last_request_ms: Option<i64>,
    in_flight: HashSet<String>,
    failure_count: u32,
    last_failure_ms: Option<i64>,
    blocked_until_ms: Option<i64>,
}

/// 准入控制器
pub struct AdmissionController {
    sessions: DashMap<String, SessionState>,
    settings: RwLock<AdmissionSettings>,
}

impl AdmissionController {
    pub fn new(settings: AdmissionSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            settings: RwLock::new(settings),
        }
    }

    /// 热更新参数（配置保存时调用）
    pub fn update_settings(&self, settings: AdmissionSettings) {
        *self.settings.write().unwrap() = settings;
    }

    /// 检查当前是否允许发起新请求
    pub fn can_make_request(&self, session_key: &str) -> AdmissionDecision {
        self.can_make_request_at(session_key, now_ms())
    }

    /// 登记一个新请求；内部会重新校验一次准入
    pub fn start_request(&self, session_key: &str, request_id: &str) -> AdmissionDecision {
        self.start_request_at(session_key, request_id, now_ms())
    }

    /// 请求结束：移除在途标记并更新失败计数/熔断
    pub fn complete_request(
        &self,
        session_key: &str,
        request_id: &str,
        success: bool,
    ) -> CompletionOutcome {
        self.complete_request_at(session_key, request_id, success, now_ms())
    }

    fn can_make_request_at(&self, session_key: &str, now: i64) -> AdmissionDecision {
        let settings = self.settings.read().unwrap().clone();
        let state = self.sessions.entry(session_key.to_string()).or_default();

        // 1. 熔断窗口
        if let Some(blocked_until) = state.blocked_until_ms {
            if blocked_until > now {
                return AdmissionDecision::deny(DenyReason::CircuitOpen, blocked_until - now);
            }
        }

        // 2. 冷却
        if let Some(last) = state.last_request_ms {
            let elapsed = now - last;
            if elapsed < settings.cooldown_ms {
                return AdmissionDecision::deny(
                    DenyReason::Cooldown,
                    settings.cooldown_ms - elapsed,
                );
            }
        }

        // 3. 并发上限
        if state.in_flight.len() >= settings.max_concurrent_requests {
            return AdmissionDecision::deny(DenyReason::TooManyInFlight, settings.cooldown_ms);
        }

        AdmissionDecision::allow()
    }

    fn start_request_at(&self, session_key: &str, request_id: &str, now: i64) -> AdmissionDecision {
        let decision = self.can_make_request_at(session_key, now);
        if !decision.allowed {
            return decision;
        }

        // entry 锁定分片，读-算-写对该会话是原子的
        let mut state = self.sessions.entry(session_key.to_string()).or_default();
        state.last_request_ms = Some(now);
        state.in_flight.insert(request_id.to_string());

        decision
    }

    fn complete_request_at(
        &self,
        session_key: &str,
        request_id: &str,
        success: bool,
        now: i64,
    ) -> CompletionOutcome {
        let settings = self.settings.read().unwrap().clone();
        let mut state = self.sessions.entry(session_key.to_string()).or_default();

        state.in_flight.remove(request_id);

        let within_window = state
            .last_failure_ms
            .map(|t| now - t < settings.failure_window_ms)
            .unwrap_or(false);

        if success {
            // 恢复信用：窗口内的成功最多抵扣一次失败
            if within_window && state.failure_count > 0 {
                state.failure_count -= 1;
            }
        } else {
            // 上一次失败已在窗口外，计数从头开始
            state.failure_count = if within_window {
                state.failure_count + 1
            } else {
                1
            };
            state.last_failure_ms = Some(now);

            if state.failure_count >= settings.failure_threshold {
                state.blocked_until_ms = Some(now + settings.circuit_open_ms);
                tracing::warn!(
                    "会话 {} 连续失败 {} 次，熔断 {} 毫秒",
                    session_key,
                    state.failure_count,
                    settings.circuit_open_ms
                );
            }
        }

        let blocked_for_ms = state
            .blocked_until_ms
            .map(|t| (t - now).max(0))
            .unwrap_or(0);

        CompletionOutcome {
            failure_count: state.failure_count,
            circuit_open: blocked_for_ms > 0,
            blocked_for_ms,
        }
    }

    /// 清除指定会话的状态
    #[allow(dead_code)]
    pub fn clear(&self, session_key: &str) -> bool {
        self.sessions.remove(session_key).is_some()
    }

    /// 清除所有过期的会话状态
    #[allow(dead_code)]
    pub fn cleanup_expired(&self) -> usize {
        let now = now_ms();
        let settings = self.settings.read().unwrap().clone();
        let mut count = 0;

        self.sessions.retain(|_k, v| {
            let idle = v.in_flight.is_empty()
                && v.blocked_until_ms.map(|t| t <= now).unwrap_or(true)
                && v.last_request_ms
                    .map(|t| now - t > settings.failure_window_ms)
                    .unwrap_or(true);
            if idle {
                count += 1;
            }
            !idle
        });

        count
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdmissionController {
        AdmissionController::new(AdmissionSettings::default())
    }

    #[test]
    fn test_cooldown_denies_then_allows() {
        let c = controller();
        let t0 = 1_000_000;

        let d = c.start_request_at("s1", "r1", t0);
        assert!(d.allowed);

        // 冷却期内第二次请求被拒，且给出正的等待时间
        let d = c.start_request_at("s1", "r2", t0 + 100);
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(DenyReason::Cooldown));
        assert!(d.wait_ms > 0);

        // 冷却期过后恢复
        let d = c.start_request_at("s1", "r2", t0 + 3001);
        assert!(d.allowed);
    }

    #[test]
    fn test_in_flight_cap() {
        let c = controller();
        let mut t = 1_000_000;

        for i in 0..3 {
            let d = c.start_request_at("s1", &format!("r{}", i), t);
            assert!(d.allowed, "request {} should be admitted", i);
            t += 3001;
        }

        // 三个在途请求都未完成，第四个被并发上限拒绝
        let d = c.start_request_at("s1", "r3", t);
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(DenyReason::TooManyInFlight));

        // 完成一个后放行
        c.complete_request_at("s1", "r0", true, t);
        let d = c.start_request_at("s1", "r3", t + 1);
        assert!(d.allowed);
    }

    #[test]
    fn test_circuit_opens_after_five_failures() {
        let c = controller();
        let t0 = 1_000_000;

        for i in 0..5 {
            let out = c.complete_request_at("s1", &format!("r{}", i), false, t0 + i as i64 * 1000);
            if i < 4 {
                assert!(!out.circuit_open);
            }
        }

        // 第 5 次失败后熔断
        let d = c.can_make_request_at("s1", t0 + 5000);
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(DenyReason::CircuitOpen));

        // 15 分钟后恢复
        let d = c.can_make_request_at("s1", t0 + 4000 + 15 * 60 * 1000 + 1);
        assert!(d.allowed);
    }

    #[test]
    fn test_stale_failure_resets_counter() {
        let c = controller();
        let t0 = 1_000_000;

        for i in 0..4 {
            c.complete_request_at("s1", "r", false, t0 + i as i64 * 1000);
        }

        // 超过 5 分钟窗口后的失败从 1 重新计数，不触发熔断
        let out = c.complete_request_at("s1", "r", false, t0 + 3000 + 5 * 60 * 1000 + 1);
        assert_eq!(out.failure_count, 1);
        assert!(!out.circuit_open);
    }

    #[test]
    fn test_success_grants_recovery_credit() {
        let c = controller();
        let t0 = 1_000_000;

        for i in 0..4 {
            c.complete_request_at("s1", "r", false, t0 + i as i64 * 100);
        }

        // 窗口内的成功抵扣一次失败
        let out = c.complete_request_at("s1", "r", true, t0 + 500);
        assert_eq!(out.failure_count, 3);

        // 计数为 0 后成功不再下探
        for i in 0..5 {
            c.complete_request_at("s1", "r", true, t0 + 600 + i as i64);
        }
        let out = c.complete_request_at("s1", "r", true, t0 + 700);
        assert_eq!(out.failure_count, 0);
    }

    #[test]
    fn test_sessions_are_independent() {
        let c = controller();
        let t0 = 1_000_000;

        for i in 0..5 {
            c.complete_request_at("s1", "r", false, t0 + i as i64 * 100);
        }

        // s1 熔断不影响 s2
        assert!(!c.can_make_request_at("s1", t0 + 1000).allowed);
        assert!(c.can_make_request_at("s2", t0 + 1000).allowed);
    }
}

//! 出站聊天限流策略：固定最小间隔 + 一分钟滑动配额

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::ChatSection;
use crate::core::{KeeperError, Result};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPolicy {
    pub global_cooldown_seconds: f64,
    pub max_per_minute: usize,
}

impl ChatPolicy {
    pub fn from_config(cfg: &ChatSection) -> Self {
        Self {
            global_cooldown_seconds: cfg.global_cooldown_secs,
            max_per_minute: cfg.max_per_minute,
        }
    }

    /// 冷却时间必须是可表示的非负秒数
    pub fn validate(&self) -> Result<()> {
        self.checked_cooldown().map(|_| ()).ok_or_else(|| {
            KeeperError::InvalidOptions(format!(
                "'globalCooldownSeconds' must be a representable number of seconds, got {}",
                self.global_cooldown_seconds
            ))
        })
    }

    fn checked_cooldown(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.global_cooldown_seconds.max(0.0)).ok()
    }

    /// 不可表示的冷却按“永不再发”处理
    fn cooldown(&self) -> Duration {
        self.checked_cooldown().unwrap_or(Duration::MAX)
    }
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self::from_config(&ChatSection::default())
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    policy: ChatPolicy,
    last_sent: Option<Instant>,
    window: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(policy: ChatPolicy) -> Self {
        Self {
            policy,
            last_sent: None,
            window: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> &ChatPolicy {
        &self.policy
    }

    /// 替换策略并清空历史
    pub fn reset(&mut self, policy: ChatPolicy) {
        self.policy = policy;
        self.last_sent = None;
        self.window.clear();
    }

    /// 判断 now 时刻能否发送；允许时记入窗口
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(front) = self.window.front() {
            if now.duration_since(*front) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.policy.cooldown() {
                return false;
            }
        }
        if self.window.len() >= self.policy.max_per_minute {
            return false;
        }

        self.last_sent = Some(now);
        self.window.push_back(now);
        true
    }

    /// 当前窗口内已发送条数
    pub fn in_window(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(cooldown: f64, max: usize) -> RateLimiter {
        RateLimiter::new(ChatPolicy {
            global_cooldown_seconds: cooldown,
            max_per_minute: max,
        })
    }

    #[test]
    fn test_cooldown_blocks_burst() {
        let mut rl = limiter(1.0, 2);
        let t0 = Instant::now();
        let results: Vec<bool> = (0..5)
            .map(|i| rl.try_acquire(t0 + Duration::from_millis(i * 200)))
            .collect();
        assert_eq!(results, vec![true, false, false, false, false]);
    }

    #[test]
    fn test_unrepresentable_cooldown_is_rejected_not_panicking() {
        let policy = ChatPolicy {
            global_cooldown_seconds: 1e20,
            max_per_minute: 10,
        };
        assert!(matches!(policy.validate(), Err(KeeperError::InvalidOptions(_))));
        assert!(ChatPolicy::default().validate().is_ok());

        let mut rl = RateLimiter::new(policy);
        let t0 = Instant::now();
        assert!(rl.try_acquire(t0));
        assert!(!rl.try_acquire(t0 + Duration::from_secs(3600)));
    }

    #[test]
    fn test_sliding_window_quota() {
        let mut rl = limiter(0.0, 2);
        let t0 = Instant::now();
        assert!(rl.try_acquire(t0));
        assert!(rl.try_acquire(t0 + Duration::from_secs(1)));
        assert!(!rl.try_acquire(t0 + Duration::from_secs(30)));
        // 第一条滑出窗口后恢复一个名额
        assert!(rl.try_acquire(t0 + Duration::from_secs(60)));
        assert!(!rl.try_acquire(t0 + Duration::from_secs(60)));
        assert_eq!(rl.in_window(), 2);
    }
}

//! 错误恢复策略
//!
//! 根据 KeeperError 的分类返回 RecoveryAction，供 ConnectionSupervisor 的重连循环决定是
//! 延迟后重连、仅上报，还是放弃。重连默认无限次、固定短延迟（保持「一直重试直到被移除」），
//! 上限可通过配置开启。

use std::time::Duration;

use crate::config::SupervisorSection;
use crate::core::{ErrorClass, KeeperError};

/// 恢复引擎给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待后重连
    Reconnect(Duration),
    /// 记录并上报给调用方，不重连
    Report(String),
    /// 停止重连（配置错误 / 已移除 / 超出上限）
    GiveUp(String),
}

/// 重连策略：固定延迟 + 可选次数上限
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// 拆除后首次重连前的等待
    pub reconnect_delay: Duration,
    /// 重连失败后再次尝试前的等待
    pub retry_delay: Duration,
    /// None 表示无限重试
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &SupervisorSection) -> Self {
        Self {
            reconnect_delay: Duration::from_millis(cfg.reconnect_delay_ms),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            max_attempts: cfg.max_reconnect_attempts,
        }
    }

    /// 第 attempt 次（从 1 开始）尝试前的等待
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.reconnect_delay
        } else {
            self.retry_delay
        }
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt > max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorSection::default())
    }
}

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Clone, Default)]
pub struct RecoveryPlanner {
    policy: ReconnectPolicy,
}

impl RecoveryPlanner {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// attempt 为即将进行的重连序号（从 1 开始）
    pub fn handle(&self, err: &KeeperError, attempt: u32) -> RecoveryAction {
        match err.class() {
            ErrorClass::ConfigurationInvalid => RecoveryAction::GiveUp(err.to_string()),
            ErrorClass::ConnectionLost | ErrorClass::SafetyTripped => {
                if self.policy.exhausted(attempt) {
                    RecoveryAction::GiveUp(format!(
                        "reconnect attempts exhausted after {}",
                        attempt.saturating_sub(1)
                    ))
                } else {
                    RecoveryAction::Reconnect(self.policy.delay_for(attempt))
                }
            }
            ErrorClass::PreconditionFailed | ErrorClass::Operator => {
                RecoveryAction::Report(err.to_string())
            }
        }
    }
}

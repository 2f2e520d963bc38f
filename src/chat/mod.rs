//! 出站聊天通道
//!
//! ChatChannel 包装句柄的原始发送；开启限流后由 RateLimiter 决定放行或静默丢弃并计数。
//! 自动化行为与聊天命令的回复都经由这里发送。

pub mod limiter;

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::time::Instant;

pub use limiter::{ChatPolicy, RateLimiter};

use crate::session::AgentHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    Delivered,
    /// 超出配额被丢弃
    Dropped,
}

/// 限流统计（状态快照用）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStats {
    pub enabled: bool,
    pub delivered_count: u64,
    pub blocked_count: u64,
    pub policy: ChatPolicy,
}

struct ChannelState {
    limiter: RateLimiter,
    enabled: bool,
    delivered: u64,
    blocked: u64,
}

pub struct ChatChannel {
    handle: AgentHandle,
    state: Mutex<ChannelState>,
}

impl ChatChannel {
    pub fn new(handle: AgentHandle, policy: ChatPolicy) -> Self {
        Self {
            handle,
            state: Mutex::new(ChannelState {
                limiter: RateLimiter::new(policy),
                enabled: false,
                delivered: 0,
                blocked: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn send(&self, message: &str) -> ChatOutcome {
        let mut state = self.state();
        if state.enabled && !state.limiter.try_acquire(Instant::now()) {
            state.blocked += 1;
            tracing::debug!(blocked = state.blocked, "Outbound chat dropped by rate limiter");
            return ChatOutcome::Dropped;
        }
        state.delivered += 1;
        drop(state);
        self.handle.chat(message);
        ChatOutcome::Delivered
    }

    /// 开启限流（替换策略并清零计数）
    pub fn enable(&self, policy: ChatPolicy) {
        let mut state = self.state();
        state.limiter.reset(policy);
        state.enabled = true;
        state.delivered = 0;
        state.blocked = 0;
    }

    /// 关闭限流，之后的消息直接发送
    pub fn disable(&self) {
        self.state().enabled = false;
    }

    pub fn is_limited(&self) -> bool {
        self.state().enabled
    }

    pub fn blocked_count(&self) -> u64 {
        self.state().blocked
    }

    pub fn stats(&self) -> ChatStats {
        let state = self.state();
        ChatStats {
            enabled: state.enabled,
            delivered_count: state.delivered,
            blocked_count: state.blocked,
            policy: state.limiter.policy().clone(),
        }
    }
}

//! 聊天限流：激活时在聊天通道前挂上 RateLimiter，停用时摘下
//!
//! 没有自己的循环，只是切换通道策略。

use std::sync::Arc;

use serde_json::Value;

use super::options::Options;
use super::runner::BehaviorCore;
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::chat::ChatPolicy;
use crate::core::Result;

pub struct RateLimitedChatBehavior {
    core: Arc<BehaviorCore>,
}

impl RateLimitedChatBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::RateLimitedChat, ctx),
        }
    }
}

impl Behavior for RateLimitedChatBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::RateLimitedChat
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.chat;
        let opts = Options::parse(options)?;
        let policy = ChatPolicy {
            global_cooldown_seconds: opts
                .f64("globalCooldownSeconds", cfg.global_cooldown_secs)?
                .max(0.0),
            max_per_minute: opts.u64("maxPerMinute", cfg.max_per_minute as u64)? as usize,
        };
        policy.validate()?;

        self.core.activate()?;
        tracing::info!(
            agent = %ctx.agent_id,
            cooldown = policy.global_cooldown_seconds,
            max_per_minute = policy.max_per_minute,
            "Chat rate limiting enabled"
        );
        ctx.chat.enable(policy);
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let ack = self.core.stop_ack();
        self.core.ctx().chat.disable();
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let stats = self.core.ctx().chat.stats();
        self.core
            .snapshot(serde_json::to_value(stats).unwrap_or(Value::Null))
    }
}

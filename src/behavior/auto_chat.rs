//! 定时喊话：按间隔从消息列表中随机挑一条，经由聊天通道发送

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::seq::SliceRandom;
use serde_json::{json, Value};

use super::options::Options;
use super::runner::{BehaviorCore, TickOutcome};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::chat::ChatOutcome;
use crate::core::{KeeperError, Result};

#[derive(Debug, Default)]
struct AutoChatState {
    sent: u64,
    dropped: u64,
    last_message: Option<String>,
}

pub struct AutoChatBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<AutoChatState>>,
}

fn lock(state: &Mutex<AutoChatState>) -> MutexGuard<'_, AutoChatState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AutoChatBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::AutoChat, ctx),
            state: Arc::new(Mutex::new(AutoChatState::default())),
        }
    }
}

impl Behavior for AutoChatBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::AutoChat
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.chat;
        let opts = Options::parse(options)?;
        let interval = opts.seconds("interval", cfg.auto_interval_secs as f64)?;
        let messages = opts.strings("messages", &cfg.messages)?;
        if messages.is_empty() {
            return Err(KeeperError::InvalidOptions(
                "'messages' must not be empty".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(KeeperError::InvalidOptions(
                "'interval' must be positive".to_string(),
            ));
        }

        let activation = self.core.activate()?;
        *lock(&self.state) = AutoChatState::default();

        let chat = Arc::clone(&ctx.chat);
        let state = Arc::clone(&self.state);
        let mut first = true;
        self.core.spawn_ticker(
            &activation,
            move || interval,
            move || {
                // 启动后等满一个间隔再发第一条
                if std::mem::take(&mut first) {
                    return Ok(TickOutcome::Continue);
                }
                let Some(message) = messages.choose(&mut rand::thread_rng()) else {
                    return Ok(TickOutcome::Continue);
                };
                let mut st = lock(&state);
                match chat.send(message) {
                    ChatOutcome::Delivered => st.sent += 1,
                    ChatOutcome::Dropped => st.dropped += 1,
                }
                st.last_message = Some(message.clone());
                Ok(TickOutcome::Continue)
            },
        );
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        self.core.stop_ack()
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "sent": st.sent,
            "dropped": st.dropped,
            "lastMessage": st.last_message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::context;
    use crate::session::MockWorld;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_sends_after_each_interval() {
        let world = MockWorld::new();
        let (ctx, _rx) = context(&world);
        let auto_chat = AutoChatBehavior::new(ctx);
        auto_chat
            .start(&json!({"interval": 10, "messages": ["hello there"]}))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(world.chats().is_empty());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(world.chats(), vec!["hello there".to_string(); 2]);
        auto_chat.stop();
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let world = MockWorld::new();
        let (ctx, _rx) = context(&world);
        let auto_chat = AutoChatBehavior::new(ctx);
        assert!(matches!(
            auto_chat.start(&json!({"messages": []})),
            Err(KeeperError::InvalidOptions(_))
        ));
    }
}

//! 行为管理器：单个会话内全部行为的注册表与统一入口
//!
//! 每次 spawn 创建一个，拆除前先停止全部行为。所有行为共享同一个 MovementArbiter 与 ChatChannel；
//! 自动停止通知经由单一通道送达，由后台任务同步模式开关、写日志并转发给工作流。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::actions::{self, ActionOutcome};
use super::ai_view::AiViewBehavior;
use super::attack::AttackBehavior;
use super::auto_chat::AutoChatBehavior;
use super::auto_eat::AutoEatBehavior;
use super::fishing::FishingBehavior;
use super::follow::FollowBehavior;
use super::guard::GuardBehavior;
use super::idle::IdleBehavior;
use super::mining::MiningBehavior;
use super::patrol::PatrolBehavior;
use super::rate_limited_chat::RateLimitedChatBehavior;
use super::workflow::{StepRegistry, WorkflowSequencer};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus, BehaviorStopped};
use crate::chat::{ChatChannel, ChatPolicy};
use crate::config::BehaviorsSection;
use crate::core::{KeeperError, Result};
use crate::movement::MovementArbiter;
use crate::observability::{AgentLog, EventBus, KeeperEvent};
use crate::session::AgentHandle;
use crate::supervisor::{ModeBook, ModeSet};

/// stopAll 的确认：列出此前处于激活状态的行为
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopAllAck {
    pub stopped: Vec<BehaviorKind>,
    pub message: String,
}

pub struct BehaviorManager {
    agent_id: String,
    ctx: BehaviorContext,
    behaviors: BTreeMap<BehaviorKind, Arc<dyn Behavior>>,
    patrol: Arc<PatrolBehavior>,
    workflow: Arc<WorkflowSequencer>,
    modes: Arc<ModeBook>,
    log: Arc<AgentLog>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl BehaviorManager {
    pub fn new(
        agent_id: impl Into<String>,
        handle: AgentHandle,
        config: Arc<BehaviorsSection>,
        modes: Arc<ModeBook>,
        log: Arc<AgentLog>,
        bus: EventBus,
    ) -> Arc<Self> {
        let agent_id = agent_id.into();
        let (notifier, stopped_rx) = mpsc::unbounded_channel();
        let ctx = BehaviorContext {
            agent_id: agent_id.clone(),
            arbiter: Arc::new(MovementArbiter::new(handle.clone())),
            chat: Arc::new(ChatChannel::new(
                handle.clone(),
                ChatPolicy::from_config(&config.chat),
            )),
            handle,
            config,
            notifier,
        };

        let patrol = Arc::new(PatrolBehavior::new(ctx.clone()));
        let mut steps = StepRegistry::new();
        let mut register = |behavior: Arc<dyn Behavior>| {
            steps.insert(behavior.kind(), behavior);
        };
        register(Arc::new(FollowBehavior::new(ctx.clone())));
        register(Arc::new(AttackBehavior::new(ctx.clone())));
        register(patrol.clone());
        register(Arc::new(MiningBehavior::new(ctx.clone())));
        register(Arc::new(GuardBehavior::new(ctx.clone())));
        register(Arc::new(FishingBehavior::new(ctx.clone())));
        register(Arc::new(IdleBehavior::anti_afk(ctx.clone())));
        register(Arc::new(AutoEatBehavior::new(ctx.clone())));
        register(Arc::new(IdleBehavior::humanize(ctx.clone())));
        register(Arc::new(IdleBehavior::safe_idle(ctx.clone())));
        register(Arc::new(AiViewBehavior::new(ctx.clone())));
        register(Arc::new(AutoChatBehavior::new(ctx.clone())));
        register(Arc::new(RateLimitedChatBehavior::new(ctx.clone())));

        let mut behaviors: BTreeMap<BehaviorKind, Arc<dyn Behavior>> = steps
            .iter()
            .map(|(kind, behavior)| (*kind, Arc::clone(behavior)))
            .collect();
        let workflow = Arc::new(WorkflowSequencer::new(ctx.clone(), steps));
        behaviors.insert(BehaviorKind::Workflow, workflow.clone());

        let consumer = tokio::spawn(consume_stops(
            agent_id.clone(),
            stopped_rx,
            Arc::clone(&modes),
            Arc::clone(&log),
            bus,
            Arc::clone(&workflow),
        ));

        Arc::new(Self {
            agent_id,
            ctx,
            behaviors,
            patrol,
            workflow,
            modes,
            log,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn context(&self) -> &BehaviorContext {
        &self.ctx
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.ctx.handle
    }

    pub fn arbiter(&self) -> &Arc<MovementArbiter> {
        &self.ctx.arbiter
    }

    pub fn chat(&self) -> &Arc<ChatChannel> {
        &self.ctx.chat
    }

    pub fn patrol(&self) -> &Arc<PatrolBehavior> {
        &self.patrol
    }

    pub fn get(&self, kind: BehaviorKind) -> Option<Arc<dyn Behavior>> {
        self.behaviors.get(&kind).cloned()
    }

    pub fn is_active(&self, kind: BehaviorKind) -> bool {
        self.behaviors
            .get(&kind)
            .map(|b| b.is_active())
            .unwrap_or(false)
    }

    /// 启用 / 停用单个行为，并同步持久化的模式开关
    pub async fn set_behavior(&self, name: &str, enabled: bool, options: Value) -> Result<Ack> {
        let kind: BehaviorKind = name.parse()?;
        let behavior = self
            .get(kind)
            .ok_or_else(|| KeeperError::UnknownBehavior(name.to_string()))?;

        if enabled {
            if !self.ctx.handle.is_live() {
                return Err(KeeperError::NotConnected);
            }
            let ack = match behavior.start(&options) {
                Ok(ack) => ack,
                Err(e) => {
                    self.log.warn(format!("Failed to start {}: {}", kind, e));
                    return Err(e);
                }
            };
            self.modes.set(kind, true, Some(options)).await;
            self.log.success(format!("{} enabled", kind));
            Ok(ack)
        } else {
            let ack = behavior.stop();
            self.modes.set(kind, false, None).await;
            self.log.info(format!("{} disabled", kind));
            Ok(ack)
        }
    }

    /// 仅在本次会话内（重新）启动行为，不改变持久化的模式开关
    ///
    /// 已在运行时先停止再按新参数启动。供游戏内聊天命令使用。
    pub fn start_transient(&self, name: &str, options: Value) -> Result<Ack> {
        let kind: BehaviorKind = name.parse()?;
        let behavior = self
            .get(kind)
            .ok_or_else(|| KeeperError::UnknownBehavior(name.to_string()))?;
        if !self.ctx.handle.is_live() {
            return Err(KeeperError::NotConnected);
        }
        behavior.stop();
        let ack = behavior.start(&options)?;
        self.log.info(format!("{} started for this session", kind));
        Ok(ack)
    }

    pub async fn do_action(&self, name: &str, params: Value) -> Result<ActionOutcome> {
        let outcome = actions::perform(&self.ctx, name, &params).await?;
        tracing::debug!(agent = %self.agent_id, action = %name, "Action performed");
        Ok(outcome)
    }

    /// 停止全部行为（不改变模式开关）；总是成功
    pub fn stop_all(&self) -> StopAllAck {
        let mut stopped = Vec::new();
        // 工作流先停，避免它在其余行为停止期间推进步骤
        if self.workflow.is_active() {
            stopped.push(BehaviorKind::Workflow);
        }
        self.workflow.stop();
        for (kind, behavior) in &self.behaviors {
            if *kind == BehaviorKind::Workflow {
                continue;
            }
            if behavior.is_active() {
                stopped.push(*kind);
            }
            behavior.stop();
        }
        self.ctx.arbiter.release_all();
        StopAllAck {
            message: format!("stopped {} behaviors", stopped.len()),
            stopped,
        }
    }

    /// 操作员「全部停止」：停止并清空模式开关，重连后不再恢复
    pub async fn stop_all_and_clear_modes(&self) -> StopAllAck {
        let ack = self.stop_all();
        self.modes.clear().await;
        self.log.info(format!("All behaviors stopped ({})", ack.stopped.len()));
        ack
    }

    pub fn get_status(&self) -> Vec<BehaviorStatus> {
        self.behaviors.values().map(|b| b.status()).collect()
    }

    /// 按持久化的开关恢复行为；启动失败的行为把开关翻回关闭
    pub async fn restore_modes(&self, modes: &ModeSet) -> usize {
        let mut restored = 0;
        for (kind, options) in modes.enabled() {
            let Some(behavior) = self.get(kind) else {
                continue;
            };
            if behavior.is_active() {
                restored += 1;
                continue;
            }
            match behavior.start(&options) {
                Ok(_) => {
                    restored += 1;
                    self.log.info(format!("Restored {}", kind));
                }
                Err(e) => {
                    self.log.warn(format!("Could not restore {}: {}", kind, e));
                    self.modes.set(kind, false, None).await;
                }
            }
        }
        restored
    }

    /// 拆除：停止全部行为并结束通知消费任务
    pub fn teardown(&self) {
        self.stop_all();
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(consumer) = consumer {
            consumer.abort();
        }
        tracing::debug!(agent = %self.agent_id, "Behavior manager torn down");
    }
}

impl Drop for BehaviorManager {
    fn drop(&mut self) {
        let consumer = self
            .consumer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(consumer) = consumer {
            consumer.abort();
        }
    }
}

async fn consume_stops(
    agent_id: String,
    mut rx: mpsc::UnboundedReceiver<BehaviorStopped>,
    modes: Arc<ModeBook>,
    log: Arc<AgentLog>,
    bus: EventBus,
    workflow: Arc<WorkflowSequencer>,
) {
    while let Some(BehaviorStopped { kind, reason }) = rx.recv().await {
        log.warn(format!("{} auto-stopped: {}", kind, reason));
        bus.emit(KeeperEvent::BehaviorStopped {
            agent_id: agent_id.clone(),
            behavior: kind,
            reason,
        });
        modes.set(kind, false, None).await;
        workflow.notify_done(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::player;
    use crate::core::StopReason;
    use crate::session::{MockWorld, Vec3};
    use crate::supervisor::MemoryModeStore;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        world: MockWorld,
        manager: Arc<BehaviorManager>,
        modes: Arc<ModeBook>,
        log: Arc<AgentLog>,
        bus: EventBus,
    }

    fn fixture() -> Fixture {
        let world = MockWorld::new();
        let bus = EventBus::default();
        let modes = Arc::new(ModeBook::new(
            "a1",
            Arc::new(MemoryModeStore::new()),
            bus.clone(),
        ));
        let log = Arc::new(AgentLog::new("a1", bus.clone()));
        let manager = BehaviorManager::new(
            "a1",
            AgentHandle::new(world.client()),
            Arc::new(BehaviorsSection::default()),
            Arc::clone(&modes),
            Arc::clone(&log),
            bus.clone(),
        );
        Fixture {
            world,
            manager,
            modes,
            log,
            bus,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_flips_mode_and_logs_once() {
        let f = fixture();
        let mut events = f.bus.subscribe();
        f.world.add_entity(player(7, "alice", Vec3::new(10.0, 64.0, 0.0)));
        f.manager
            .set_behavior("follow", true, json!({"target": "alice"}))
            .await
            .unwrap();
        assert!(f.modes.is_enabled(BehaviorKind::Follow));

        f.world.remove_entity(7);
        tokio::time::sleep(Duration::from_secs(8)).await;

        let follow = f
            .manager
            .get_status()
            .into_iter()
            .find(|s| s.name == BehaviorKind::Follow)
            .unwrap();
        assert!(!follow.active);
        assert_eq!(follow.stop_reason, Some(StopReason::TargetLost));
        assert!(!f.modes.is_enabled(BehaviorKind::Follow));

        let lost = f
            .log
            .recent(100)
            .into_iter()
            .filter(|e| e.message.contains("target_lost"))
            .count();
        assert_eq!(lost, 1);

        let mut stopped_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, KeeperEvent::BehaviorStopped { reason: StopReason::TargetLost, .. }) {
                stopped_events += 1;
            }
        }
        assert_eq!(stopped_events, 1);
    }

    #[tokio::test]
    async fn test_precondition_failure_leaves_mode_off() {
        let f = fixture();
        let err = f
            .manager
            .set_behavior("follow", true, json!({"target": "ghost"}))
            .await
            .unwrap_err();
        assert!(matches!(err, KeeperError::PreconditionFailed(_)));
        assert!(!f.modes.is_enabled(BehaviorKind::Follow));

        assert!(matches!(
            f.manager.set_behavior("dance", true, Value::Null).await,
            Err(KeeperError::UnknownBehavior(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_keeps_flags_but_operator_stop_clears_them() {
        let f = fixture();
        f.manager
            .set_behavior("antiAfk", true, Value::Null)
            .await
            .unwrap();
        f.manager.set_behavior("patrol", true, Value::Null).await.unwrap();

        let ack = f.manager.stop_all();
        assert_eq!(ack.stopped, vec![BehaviorKind::Patrol, BehaviorKind::AntiAfk]);
        assert!(f.manager.get_status().iter().all(|s| !s.active));
        assert!(f.modes.is_enabled(BehaviorKind::Patrol));
        assert_eq!(f.manager.arbiter().owner(), None);

        assert_eq!(f.manager.restore_modes(&f.modes.snapshot()).await, 2);
        assert!(f.manager.is_active(BehaviorKind::AntiAfk));

        let ack = f.manager.stop_all_and_clear_modes().await;
        assert_eq!(ack.stopped.len(), 2);
        assert!(f.modes.snapshot().enabled().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_start_leaves_flags_alone() {
        let f = fixture();
        f.manager.start_transient("patrol", Value::Null).unwrap();
        assert!(f.manager.is_active(BehaviorKind::Patrol));
        assert!(!f.modes.is_enabled(BehaviorKind::Patrol));

        f.manager
            .set_behavior("antiAfk", true, json!({"intervalMs": 1000}))
            .await
            .unwrap();
        // 已运行的行为按新参数重启，持久化的参数不变
        f.manager
            .start_transient("antiAfk", json!({"intervalMs": 5000}))
            .unwrap();
        assert!(f.manager.is_active(BehaviorKind::AntiAfk));
        assert_eq!(
            f.modes.snapshot().enabled(),
            vec![(BehaviorKind::AntiAfk, json!({"intervalMs": 1000}))]
        );
        f.manager.teardown();
    }

    #[tokio::test]
    async fn test_failed_restore_flips_flag_off() {
        let f = fixture();
        f.modes
            .set(BehaviorKind::Fishing, true, Some(Value::Null))
            .await;
        f.modes.set(BehaviorKind::Humanize, true, None).await;

        let restored = f.manager.restore_modes(&f.modes.snapshot()).await;
        assert_eq!(restored, 1);
        assert!(!f.modes.is_enabled(BehaviorKind::Fishing));
        assert!(f.modes.is_enabled(BehaviorKind::Humanize));
        f.manager.teardown();
        assert!(!f.manager.is_active(BehaviorKind::Humanize));
    }

    #[tokio::test]
    async fn test_disconnected_handle_rejects_enable() {
        let f = fixture();
        f.manager.handle().invalidate();
        assert!(matches!(
            f.manager.set_behavior("humanize", true, Value::Null).await,
            Err(KeeperError::NotConnected)
        ));
        // 停用始终成功
        assert!(f.manager.set_behavior("humanize", false, Value::Null).await.is_ok());
    }
}

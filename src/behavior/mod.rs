//! 行为层：可在运行时启停的自动化活动
//!
//! 每个行为实例在 BehaviorManager 创建时构造一次，之后可反复 start / stop。
//! 生命周期（激活、取消令牌、自动停止通知）统一由 [`runner::BehaviorCore`] 管理；
//! 行为自身只负责前置条件检查和每个 tick 的决策。

pub mod actions;
pub mod ai_view;
pub mod attack;
pub mod auto_chat;
pub mod auto_eat;
pub mod fishing;
pub mod follow;
pub mod guard;
pub mod idle;
pub mod manager;
pub mod mining;
pub mod options;
pub mod patrol;
pub mod rate_limited_chat;
pub mod runner;
pub mod workflow;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::chat::ChatChannel;
use crate::config::BehaviorsSection;
use crate::core::{KeeperError, Result, StopReason};
use crate::movement::MovementArbiter;
use crate::session::AgentHandle;

pub use manager::BehaviorManager;
pub use runner::{Activation, BehaviorCore, TickOutcome};
pub use workflow::WorkflowSequencer;

/// 行为名称（对外以 camelCase 表示，如 `antiAfk`）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum BehaviorKind {
    Follow,
    Attack,
    Patrol,
    Mining,
    Guard,
    Fishing,
    AntiAfk,
    AutoEat,
    Humanize,
    SafeIdle,
    AiView,
    AutoChat,
    RateLimitedChat,
    Workflow,
}

impl BehaviorKind {
    pub const ALL: [BehaviorKind; 14] = [
        BehaviorKind::Follow,
        BehaviorKind::Attack,
        BehaviorKind::Patrol,
        BehaviorKind::Mining,
        BehaviorKind::Guard,
        BehaviorKind::Fishing,
        BehaviorKind::AntiAfk,
        BehaviorKind::AutoEat,
        BehaviorKind::Humanize,
        BehaviorKind::SafeIdle,
        BehaviorKind::AiView,
        BehaviorKind::AutoChat,
        BehaviorKind::RateLimitedChat,
        BehaviorKind::Workflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorKind::Follow => "follow",
            BehaviorKind::Attack => "attack",
            BehaviorKind::Patrol => "patrol",
            BehaviorKind::Mining => "mining",
            BehaviorKind::Guard => "guard",
            BehaviorKind::Fishing => "fishing",
            BehaviorKind::AntiAfk => "antiAfk",
            BehaviorKind::AutoEat => "autoEat",
            BehaviorKind::Humanize => "humanize",
            BehaviorKind::SafeIdle => "safeIdle",
            BehaviorKind::AiView => "aiView",
            BehaviorKind::AutoChat => "autoChat",
            BehaviorKind::RateLimitedChat => "rateLimitedChat",
            BehaviorKind::Workflow => "workflow",
        }
    }
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BehaviorKind {
    type Err = KeeperError;

    /// 接受 camelCase、snake_case 与全小写写法；`autoAttack` 与 `rest` 为兼容别名
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        let kind = match normalized.as_str() {
            "follow" => BehaviorKind::Follow,
            "attack" | "autoattack" => BehaviorKind::Attack,
            "patrol" => BehaviorKind::Patrol,
            "mining" | "mine" => BehaviorKind::Mining,
            "guard" => BehaviorKind::Guard,
            "fishing" | "fish" => BehaviorKind::Fishing,
            "antiafk" => BehaviorKind::AntiAfk,
            "autoeat" => BehaviorKind::AutoEat,
            "humanize" => BehaviorKind::Humanize,
            "safeidle" | "rest" => BehaviorKind::SafeIdle,
            "aiview" => BehaviorKind::AiView,
            "autochat" => BehaviorKind::AutoChat,
            "ratelimitedchat" | "ratelimit" => BehaviorKind::RateLimitedChat,
            "workflow" => BehaviorKind::Workflow,
            _ => return Err(KeeperError::UnknownBehavior(s.to_string())),
        };
        Ok(kind)
    }
}

/// 攻击目标筛选模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    #[default]
    Hostile,
    All,
    Player,
}

impl FromStr for TargetMode {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hostile" => Ok(TargetMode::Hostile),
            "all" => Ok(TargetMode::All),
            "player" | "players" => Ok(TargetMode::Player),
            other => Err(KeeperError::InvalidOptions(format!(
                "unknown target mode '{}'",
                other
            ))),
        }
    }
}

/// start / stop 的确认
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub behavior: BehaviorKind,
    pub active: bool,
    pub message: String,
}

impl Ack {
    pub fn new(behavior: BehaviorKind, active: bool, message: impl Into<String>) -> Self {
        Self {
            behavior,
            active,
            message: message.into(),
        }
    }
}

/// 行为状态快照，任何时候都可读取（包括拆除之后）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorStatus {
    pub name: BehaviorKind,
    pub active: bool,
    pub last_result: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub started_at: Option<String>,
    /// 行为特有的字段（目标、计数等）
    pub detail: Value,
}

/// 行为自动停止时发送给 BehaviorManager 的类型化通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorStopped {
    pub kind: BehaviorKind,
    pub reason: StopReason,
}

/// 行为的公共契约
pub trait Behavior: Send + Sync {
    fn kind(&self) -> BehaviorKind;

    /// 检查前置条件并启动内部循环
    fn start(&self, options: &Value) -> Result<Ack>;

    /// 同步取消全部定时器并撤回移动请求；重复调用无副作用
    fn stop(&self) -> Ack;

    fn status(&self) -> BehaviorStatus;

    fn is_active(&self) -> bool {
        self.status().active
    }
}

/// 行为共享的运行环境（每个 BehaviorManager 一份）
#[derive(Clone)]
pub struct BehaviorContext {
    pub agent_id: String,
    pub handle: AgentHandle,
    pub arbiter: Arc<MovementArbiter>,
    pub chat: Arc<ChatChannel>,
    pub config: Arc<BehaviorsSection>,
    pub notifier: mpsc::UnboundedSender<BehaviorStopped>,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::chat::ChatPolicy;
    use crate::session::{Entity, EntityKind, MockWorld, Vec3};

    /// 基于 MockWorld 的测试上下文
    pub(crate) fn context(
        world: &MockWorld,
    ) -> (BehaviorContext, mpsc::UnboundedReceiver<BehaviorStopped>) {
        context_with(world, BehaviorsSection::default())
    }

    pub(crate) fn context_with(
        world: &MockWorld,
        config: BehaviorsSection,
    ) -> (BehaviorContext, mpsc::UnboundedReceiver<BehaviorStopped>) {
        let handle = AgentHandle::new(world.client());
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = BehaviorContext {
            agent_id: "test".to_string(),
            arbiter: Arc::new(MovementArbiter::new(handle.clone())),
            chat: Arc::new(ChatChannel::new(handle.clone(), ChatPolicy::default())),
            handle,
            config: Arc::new(config),
            notifier: tx,
        };
        (ctx, rx)
    }

    pub(crate) fn player(id: u64, name: &str, pos: Vec3) -> Entity {
        Entity {
            id,
            name: name.to_string(),
            kind: EntityKind::Player,
            position: pos,
            height: 1.8,
        }
    }

    pub(crate) fn mob(id: u64, name: &str, kind: EntityKind, pos: Vec3) -> Entity {
        Entity {
            id,
            name: name.to_string(),
            kind,
            position: pos,
            height: 1.95,
        }
    }
}

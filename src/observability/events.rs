//! 对外事件：状态变化、日志、自动停止与模式开关变化（可序列化为 JSON 供仪表盘实时展示）

use serde::Serialize;
use tokio::sync::broadcast;

use super::log::LogEntry;
use crate::behavior::BehaviorKind;
use crate::core::{AgentStatus, StopReason};
use crate::supervisor::ModeSet;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeeperEvent {
    /// 连接状态或行为状态变化后的完整快照
    Status { agent_id: String, status: Box<AgentStatus> },
    Log { entry: LogEntry },
    /// 行为因安全条件自动停止
    BehaviorStopped {
        agent_id: String,
        behavior: BehaviorKind,
        reason: StopReason,
    },
    ModesChanged { agent_id: String, modes: ModeSet },
}

impl KeeperEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            KeeperEvent::Status { agent_id, .. }
            | KeeperEvent::BehaviorStopped { agent_id, .. }
            | KeeperEvent::ModesChanged { agent_id, .. } => agent_id,
            KeeperEvent::Log { entry } => &entry.agent_id,
        }
    }
}

/// 进程内事件总线，所有代理共用一个
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KeeperEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 没有订阅者时静默丢弃
    pub fn emit(&self, event: KeeperEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeeperEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

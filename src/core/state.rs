//! 状态定义：连接状态机与代理状态快照
//!
//! 对外只暴露 AgentStatus 快照；内部状态由 ConnectionSupervisor 维护并投影到快照。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::behavior::{BehaviorKind, BehaviorStatus};
use crate::session::Vec3;

/// 连接状态：Disconnected → Connecting → Connected →（卡死 / 断线）→ Disconnected
///
/// 只有显式 remove() 才会进入终态 Removed。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Removed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Removed => "removed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartTimerStatus {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub next_restart: Option<String>,
}

/// 单个代理的状态快照（仪表盘展示用）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub id: String,
    pub name: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub server_address: String,
    pub username: Option<String>,
    pub version: Option<String>,
    pub health: Option<f32>,
    pub food: Option<f32>,
    pub position: Option<Vec3>,
    pub players: Vec<String>,
    /// 持久化的模式开关（断线期间仍保留）
    pub modes: BTreeMap<BehaviorKind, bool>,
    /// 当前会话的行为状态；未连接时为上一次会话拆除前的快照
    pub behaviors: Vec<BehaviorStatus>,
    pub restart_timer: RestartTimerStatus,
    pub reconnect_attempts: u32,
    pub last_activity_secs_ago: Option<f64>,
}

impl AgentStatus {
    pub fn behavior(&self, kind: BehaviorKind) -> Option<&BehaviorStatus> {
        self.behaviors.iter().find(|b| b.name == kind)
    }
}

//! 错误类型与自动停止原因
//!
//! 与 RecoveryPlanner 配合：根据 KeeperError 的分类决定重连 / 上报 / 放弃。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::behavior::BehaviorKind;

/// 会话协议层（外部协作方）返回的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// 句柄已失效（断线 / 拆除后继续调用）
    #[error("Session closed")]
    Closed,

    #[error("Session operation timed out")]
    Timeout,

    /// 协议端不支持该能力（如钓鱼）
    #[error("Capability unsupported: {0}")]
    Unsupported(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// 编排核心对外暴露的错误
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Agent already connected")]
    AlreadyConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// 缺少 host 等构造级配置错误，仅对本次 connect() 致命
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("Agent not connected")]
    NotConnected,

    #[error("Behavior already active: {0}")]
    AlreadyActive(BehaviorKind),

    /// 启动前置条件不满足（目标不可见、无鱼竿、无食物等），行为不会启动
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Unknown behavior: {0}")]
    UnknownBehavior(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent already exists: {0}")]
    AgentExists(String),

    /// 代理已被显式移除（终态）
    #[error("Agent removed")]
    Removed,

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 错误分类（对应错误处理设计中的四类 + 操作员输入错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 报告给调用方，行为不启动
    PreconditionFailed,
    /// 行为安全条件触发，本地停止并通知
    SafetyTripped,
    /// 由监管者重连循环恢复
    ConnectionLost,
    /// 对该次 connect() 致命
    ConfigurationInvalid,
    /// 操作员请求本身有误（未知行为、重复启动等）
    Operator,
}

impl KeeperError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KeeperError::PreconditionFailed(_) => ErrorClass::PreconditionFailed,
            KeeperError::ConnectionFailed(_)
            | KeeperError::NotConnected
            | KeeperError::Io(_) => ErrorClass::ConnectionLost,
            KeeperError::Session(err) => match err {
                SessionError::Unsupported(_) => ErrorClass::SafetyTripped,
                _ => ErrorClass::ConnectionLost,
            },
            KeeperError::ConfigurationInvalid(_) | KeeperError::Removed => {
                ErrorClass::ConfigurationInvalid
            }
            _ => ErrorClass::Operator,
        }
    }
}

/// 自动停止原因（序列化为 snake_case，如 `target_lost`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    LowHealth,
    InventoryFull,
    TargetLost,
    RodMissing,
    CapabilityUnsupported,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::LowHealth => "low_health",
            StopReason::InventoryFull => "inventory_full",
            StopReason::TargetLost => "target_lost",
            StopReason::RodMissing => "rod_missing",
            StopReason::CapabilityUnsupported => "capability_unsupported",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;

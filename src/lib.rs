//! Keeper - 游戏世界机器人托管
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与恢复策略、状态快照、优雅关闭
//! - **observability**: tracing 初始化、事件总线、每个代理的日志缓冲
//! - **session**: 协议客户端边界（能力接口、AgentHandle、模拟实现）
//! - **movement**: 移动意图仲裁（按优先级决定谁控制寻路）
//! - **chat**: 出站聊天限流
//! - **behavior**: 可启停的自动化行为、工作流与行为管理器
//! - **supervisor**: 连接监管、自愈重连、模式持久化、聊天命令、代理池

pub mod behavior;
pub mod chat;
pub mod config;
pub mod core;
pub mod movement;
pub mod observability;
pub mod session;
pub mod supervisor;

pub use crate::core::{AgentStatus, ConnectionState, KeeperError, Result};
pub use behavior::{BehaviorKind, BehaviorManager};
pub use supervisor::{AgentPool, ConnectionSupervisor};

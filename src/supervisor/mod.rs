//! 监管层：连接生命周期、自愈重连、模式开关持久化与聊天命令

pub mod commands;
pub mod connection;
pub mod modes;
pub mod pool;

pub use commands::ChatCommand;
pub use connection::{generate_username, ConnectionSupervisor, SupervisorContext};
pub use modes::{JsonFileModeStore, MemoryModeStore, ModeBook, ModeEntry, ModeSet, ModeStore};
pub use pool::AgentPool;

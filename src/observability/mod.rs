//! 可观测性：tracing 初始化、对外事件流与每个代理的日志环形缓冲

pub mod events;
pub mod log;

pub use events::{EventBus, KeeperEvent};
pub use log::{AgentLog, LogEntry, LogLevel};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志：默认 info，可用 RUST_LOG 覆盖；重复调用无副作用
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

//! 核心层：错误与恢复、状态快照、优雅关闭

pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use error::{ErrorClass, KeeperError, Result, SessionError, StopReason};
pub use recovery::{ReconnectPolicy, RecoveryAction, RecoveryPlanner};
pub use shutdown::{
    run_with_graceful_shutdown, PoolCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
pub use state::{AgentStatus, ConnectionState, RestartTimerStatus};

//! 移动仲裁：把多个行为的并发移动请求收敛为单一意图

pub mod arbiter;
pub mod intent;

pub use arbiter::{MovementArbiter, RequestOutcome};
pub use intent::{MovementIntent, MovementPriority};

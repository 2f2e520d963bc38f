//! 会话层：与协议客户端之间的边界
//!
//! 协议本身（连接、寻路、世界模型）由外部协作方提供，这里只定义能力接口与数据类型。

pub mod handle;
pub mod mock;
pub mod types;

pub use handle::{AgentHandle, Connector, Session, SessionClient};
pub use mock::{MockAction, MockConnector, MockWorld};
pub use types::{
    Block, ConnectOptions, ControlState, Entity, EntityId, EntityKind, Item, MovementGoal,
    SessionEvent, Vec3,
};

//! AgentHandle：已连接会话的能力对象
//!
//! 协议客户端（外部协作方）实现 SessionClient / Connector；本系统只通过 AgentHandle 使用它。
//! 句柄由 ConnectionSupervisor 独占，行为只持有克隆引用；拆除时 `invalidate()`，
//! 之后所有调用都是空操作（查询返回 None / 空，异步动作返回 `SessionError::Closed`）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{
    Block, ConnectOptions, ControlState, Entity, EntityId, EntityKind, Item, MovementGoal,
    SessionEvent, Vec3,
};
use crate::core::SessionError;

/// 协议客户端 trait：动作、遥测与异步操作
#[async_trait]
pub trait SessionClient: Send + Sync {
    fn username(&self) -> String;
    fn version(&self) -> String;

    fn position(&self) -> Option<Vec3>;
    fn health(&self) -> f32;
    fn food(&self) -> f32;
    fn players(&self) -> Vec<String>;
    /// 附近实体（不含自身）
    fn entities(&self) -> Vec<Entity>;
    fn inventory(&self) -> Vec<Item>;
    fn free_slots(&self) -> usize;
    /// 寻路是否正在执行
    fn is_moving(&self) -> bool;
    fn find_block(&self, names: &[String], max_distance: f64) -> Option<Block>;

    fn set_goal(&self, goal: MovementGoal);
    fn stop_movement(&self);
    fn look_at(&self, point: Vec3);
    fn attack(&self, entity: EntityId);
    fn chat(&self, message: &str);
    fn set_control_state(&self, control: ControlState, enabled: bool);
    fn control_state(&self, control: ControlState) -> bool;
    fn swing_arm(&self);
    fn activate_item(&self);
    fn respawn(&self);
    fn quit(&self);

    async fn equip(&self, item: &str) -> Result<(), SessionError>;
    async fn consume(&self) -> Result<(), SessionError>;
    async fn dig(&self, block: &Block) -> Result<(), SessionError>;

    /// 抛竿并等待上钩，返回钓到的物品；默认不支持
    async fn fish(&self) -> Result<Option<Item>, SessionError> {
        Err(SessionError::Unsupported("fishing".to_string()))
    }
}

/// 已建立的会话：客户端 + 入站事件流
pub struct Session {
    pub client: Arc<dyn SessionClient>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// 建立会话的工厂（协议协作方的 `connect(options)`）
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<Session, SessionError>;
}

/// 会话能力句柄，可廉价克隆；失效后全部操作为空操作
#[derive(Clone)]
pub struct AgentHandle {
    client: Arc<dyn SessionClient>,
    live: Arc<AtomicBool>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("live", &self.is_live())
            .finish()
    }
}

impl AgentHandle {
    pub fn new(client: Arc<dyn SessionClient>) -> Self {
        Self {
            client,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// 使所有克隆失效（拆除时由监管者调用）
    pub fn invalidate(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn client(&self) -> Option<&Arc<dyn SessionClient>> {
        if self.is_live() {
            Some(&self.client)
        } else {
            None
        }
    }

    pub fn username(&self) -> Option<String> {
        self.client().map(|c| c.username())
    }

    pub fn version(&self) -> Option<String> {
        self.client().map(|c| c.version())
    }

    pub fn position(&self) -> Option<Vec3> {
        self.client().and_then(|c| c.position())
    }

    pub fn health(&self) -> Option<f32> {
        self.client().map(|c| c.health())
    }

    pub fn food(&self) -> Option<f32> {
        self.client().map(|c| c.food())
    }

    pub fn players(&self) -> Vec<String> {
        self.client().map(|c| c.players()).unwrap_or_default()
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.client().map(|c| c.entities()).unwrap_or_default()
    }

    /// 按用户名查找当前可见的玩家实体
    pub fn player_entity(&self, name: &str) -> Option<Entity> {
        self.entities()
            .into_iter()
            .find(|e| e.kind == EntityKind::Player && e.name == name)
    }

    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.entities().into_iter().find(|e| e.id == id)
    }

    /// 在 range 内、满足过滤条件的最近实体
    pub fn nearest_entity<F>(&self, range: f64, filter: F) -> Option<(Entity, f64)>
    where
        F: Fn(&Entity) -> bool,
    {
        let origin = self.position()?;
        self.entities()
            .into_iter()
            .filter(|e| filter(e))
            .map(|e| {
                let dist = origin.distance_to(&e.position);
                (e, dist)
            })
            .filter(|(_, dist)| *dist <= range)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn inventory(&self) -> Vec<Item> {
        self.client().map(|c| c.inventory()).unwrap_or_default()
    }

    /// 背包中第一个名字匹配的物品
    pub fn find_item<F>(&self, matches: F) -> Option<Item>
    where
        F: Fn(&str) -> bool,
    {
        self.inventory()
            .into_iter()
            .find(|item| item.count > 0 && matches(&item.name))
    }

    pub fn free_slots(&self) -> Option<usize> {
        self.client().map(|c| c.free_slots())
    }

    pub fn is_moving(&self) -> bool {
        self.client().map(|c| c.is_moving()).unwrap_or(false)
    }

    pub fn find_block(&self, names: &[String], max_distance: f64) -> Option<Block> {
        self.client().and_then(|c| c.find_block(names, max_distance))
    }

    /// 移动目标只应由 MovementArbiter 调用
    pub(crate) fn set_goal(&self, goal: MovementGoal) {
        if let Some(c) = self.client() {
            c.set_goal(goal);
        }
    }

    pub(crate) fn stop_movement(&self) {
        if let Some(c) = self.client() {
            c.stop_movement();
        }
    }

    pub fn look_at(&self, point: Vec3) {
        if let Some(c) = self.client() {
            c.look_at(point);
        }
    }

    pub fn attack(&self, entity: EntityId) {
        if let Some(c) = self.client() {
            c.attack(entity);
        }
    }

    /// 原始出站聊天；自动化行为应通过 ChatChannel 发送
    pub fn chat(&self, message: &str) {
        if let Some(c) = self.client() {
            c.chat(message);
        }
    }

    pub fn set_control_state(&self, control: ControlState, enabled: bool) {
        if let Some(c) = self.client() {
            c.set_control_state(control, enabled);
        }
    }

    pub fn control_state(&self, control: ControlState) -> bool {
        self.client()
            .map(|c| c.control_state(control))
            .unwrap_or(false)
    }

    pub fn swing_arm(&self) {
        if let Some(c) = self.client() {
            c.swing_arm();
        }
    }

    pub fn activate_item(&self) {
        if let Some(c) = self.client() {
            c.activate_item();
        }
    }

    pub fn respawn(&self) {
        if let Some(c) = self.client() {
            c.respawn();
        }
    }

    /// 结束会话；失效后的句柄同样不做任何事
    pub fn quit(&self) {
        if let Some(c) = self.client() {
            c.quit();
        }
    }

    pub async fn equip(&self, item: &str) -> Result<(), SessionError> {
        match self.client() {
            Some(c) => c.equip(item).await,
            None => Err(SessionError::Closed),
        }
    }

    pub async fn consume(&self) -> Result<(), SessionError> {
        match self.client() {
            Some(c) => c.consume().await,
            None => Err(SessionError::Closed),
        }
    }

    pub async fn dig(&self, block: &Block) -> Result<(), SessionError> {
        match self.client() {
            Some(c) => c.dig(block).await,
            None => Err(SessionError::Closed),
        }
    }

    pub async fn fish(&self) -> Result<Option<Item>, SessionError> {
        match self.client() {
            Some(c) => c.fish().await,
            None => Err(SessionError::Closed),
        }
    }
}

//! 内存模拟会话（测试用 / 未接入协议客户端时的回退）
//!
//! MockWorld 保存可脚本化的世界状态并记录所有动作；MockConnector 每次连接都新建事件通道，
//! 测试通过 `world.emit(..)` 向当前会话注入事件。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::handle::{Connector, Session, SessionClient};
use super::types::{
    Block, ConnectOptions, ControlState, Entity, EntityId, Item, MovementGoal, SessionEvent,
    Vec3,
};
use crate::core::SessionError;

/// 记录下来的出站动作
#[derive(Debug, Clone, PartialEq)]
pub enum MockAction {
    SetGoal(MovementGoal),
    StopMovement,
    LookAt(Vec3),
    Attack(EntityId),
    Chat(String),
    Control(ControlState, bool),
    SwingArm,
    ActivateItem,
    Respawn,
    Quit,
    Equip(String),
    Consume,
    Dig(String),
    Fish,
}

struct WorldState {
    username: String,
    version: String,
    position: Option<Vec3>,
    health: f32,
    food: f32,
    players: Vec<String>,
    entities: Vec<Entity>,
    inventory: Vec<Item>,
    free_slots: usize,
    moving: bool,
    blocks: Vec<Block>,
    controls: HashSet<ControlState>,
    actions: Vec<MockAction>,
    /// 设置目标即瞬移到位
    instant_travel: bool,
    fishing_supported: bool,
    fish_delay: Duration,
    dig_delay: Duration,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            username: "Bot".to_string(),
            version: "1.20.1".to_string(),
            position: Some(Vec3::new(0.0, 64.0, 0.0)),
            health: 20.0,
            food: 20.0,
            players: Vec::new(),
            entities: Vec::new(),
            inventory: Vec::new(),
            free_slots: 36,
            moving: false,
            blocks: Vec::new(),
            controls: HashSet::new(),
            actions: Vec::new(),
            instant_travel: true,
            fishing_supported: true,
            fish_delay: Duration::from_secs(5),
            dig_delay: Duration::from_millis(500),
            events: None,
        }
    }
}

/// 可共享的模拟世界
#[derive(Clone, Default)]
pub struct MockWorld {
    state: Arc<Mutex<WorldState>>,
}

impl MockWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 绑定到本世界的会话客户端
    pub fn client(&self) -> Arc<dyn SessionClient> {
        Arc::new(MockClient {
            world: self.clone(),
        })
    }

    /// 向当前会话推送入站事件；无活动会话时返回 false
    pub fn emit(&self, event: SessionEvent) -> bool {
        match &self.state().events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn attach_events(&self, tx: mpsc::UnboundedSender<SessionEvent>) {
        self.state().events = Some(tx);
    }

    pub fn actions(&self) -> Vec<MockAction> {
        self.state().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.state().actions.clear();
    }

    /// 记录中的聊天消息
    pub fn chats(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                MockAction::Chat(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn count_actions<F>(&self, pred: F) -> usize
    where
        F: Fn(&MockAction) -> bool,
    {
        self.state().actions.iter().filter(|a| pred(a)).count()
    }

    pub fn set_username(&self, name: &str) {
        self.state().username = name.to_string();
    }

    pub fn position(&self) -> Option<Vec3> {
        self.state().position
    }

    pub fn set_position(&self, pos: Vec3) {
        self.state().position = Some(pos);
    }

    pub fn set_health(&self, health: f32) {
        self.state().health = health;
    }

    pub fn set_food(&self, food: f32) {
        self.state().food = food;
    }

    pub fn set_players(&self, players: Vec<String>) {
        self.state().players = players;
    }

    pub fn add_entity(&self, entity: Entity) {
        let mut state = self.state();
        state.entities.retain(|e| e.id != entity.id);
        state.entities.push(entity);
    }

    pub fn remove_entity(&self, id: EntityId) {
        self.state().entities.retain(|e| e.id != id);
    }

    pub fn move_entity(&self, id: EntityId, pos: Vec3) {
        if let Some(e) = self.state().entities.iter_mut().find(|e| e.id == id) {
            e.position = pos;
        }
    }

    pub fn give(&self, item: Item) {
        let mut state = self.state();
        match state.inventory.iter_mut().find(|i| i.name == item.name) {
            Some(existing) => existing.count += item.count,
            None => {
                state.inventory.push(item);
                state.free_slots = state.free_slots.saturating_sub(1);
            }
        }
    }

    pub fn inventory(&self) -> Vec<Item> {
        self.state().inventory.clone()
    }

    pub fn set_free_slots(&self, slots: usize) {
        self.state().free_slots = slots;
    }

    pub fn add_block(&self, block: Block) {
        self.state().blocks.push(block);
    }

    pub fn set_moving(&self, moving: bool) {
        self.state().moving = moving;
    }

    pub fn set_instant_travel(&self, enabled: bool) {
        self.state().instant_travel = enabled;
    }

    pub fn set_fishing_supported(&self, supported: bool) {
        self.state().fishing_supported = supported;
    }

    pub fn set_fish_delay(&self, delay: Duration) {
        self.state().fish_delay = delay;
    }

    pub fn control(&self, control: ControlState) -> bool {
        self.state().controls.contains(&control)
    }

    fn record(&self, action: MockAction) {
        self.state().actions.push(action);
    }
}

struct MockClient {
    world: MockWorld,
}

#[async_trait]
impl SessionClient for MockClient {
    fn username(&self) -> String {
        self.world.state().username.clone()
    }

    fn version(&self) -> String {
        self.world.state().version.clone()
    }

    fn position(&self) -> Option<Vec3> {
        self.world.state().position
    }

    fn health(&self) -> f32 {
        self.world.state().health
    }

    fn food(&self) -> f32 {
        self.world.state().food
    }

    fn players(&self) -> Vec<String> {
        self.world.state().players.clone()
    }

    fn entities(&self) -> Vec<Entity> {
        self.world.state().entities.clone()
    }

    fn inventory(&self) -> Vec<Item> {
        self.world.state().inventory.clone()
    }

    fn free_slots(&self) -> usize {
        self.world.state().free_slots
    }

    fn is_moving(&self) -> bool {
        self.world.state().moving
    }

    fn find_block(&self, names: &[String], max_distance: f64) -> Option<Block> {
        let state = self.world.state();
        let origin = state.position?;
        state
            .blocks
            .iter()
            .filter(|b| names.iter().any(|n| n == &b.name))
            .map(|b| (b, origin.distance_to(&b.position)))
            .filter(|(_, d)| *d <= max_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(b, _)| b.clone())
    }

    fn set_goal(&self, goal: MovementGoal) {
        let mut state = self.world.state();
        state.actions.push(MockAction::SetGoal(goal.clone()));
        if !state.instant_travel {
            state.moving = true;
            return;
        }
        match goal {
            MovementGoal::Near { point, .. } => {
                state.position = Some(point);
                state.moving = false;
            }
            MovementGoal::Follow { entity, distance } => {
                let target = state
                    .entities
                    .iter()
                    .find(|e| e.id == entity)
                    .map(|e| e.position);
                if let Some(pos) = target {
                    state.position = Some(pos.offset(distance, 0.0, 0.0));
                }
                state.moving = false;
            }
        }
    }

    fn stop_movement(&self) {
        let mut state = self.world.state();
        state.moving = false;
        state.actions.push(MockAction::StopMovement);
    }

    fn look_at(&self, point: Vec3) {
        self.world.record(MockAction::LookAt(point));
    }

    fn attack(&self, entity: EntityId) {
        self.world.record(MockAction::Attack(entity));
    }

    fn chat(&self, message: &str) {
        self.world.record(MockAction::Chat(message.to_string()));
    }

    fn set_control_state(&self, control: ControlState, enabled: bool) {
        let mut state = self.world.state();
        if enabled {
            state.controls.insert(control);
        } else {
            state.controls.remove(&control);
        }
        state.actions.push(MockAction::Control(control, enabled));
    }

    fn control_state(&self, control: ControlState) -> bool {
        self.world.control(control)
    }

    fn swing_arm(&self) {
        self.world.record(MockAction::SwingArm);
    }

    fn activate_item(&self) {
        self.world.record(MockAction::ActivateItem);
    }

    fn respawn(&self) {
        self.world.record(MockAction::Respawn);
    }

    fn quit(&self) {
        let mut state = self.world.state();
        state.actions.push(MockAction::Quit);
        state.events = None;
    }

    async fn equip(&self, item: &str) -> Result<(), SessionError> {
        let has = self.world.state().inventory.iter().any(|i| i.name == item);
        self.world.record(MockAction::Equip(item.to_string()));
        if has {
            Ok(())
        } else {
            Err(SessionError::NotFound(item.to_string()))
        }
    }

    async fn consume(&self) -> Result<(), SessionError> {
        let mut state = self.world.state();
        state.actions.push(MockAction::Consume);
        state.food = (state.food + 6.0).min(20.0);
        Ok(())
    }

    async fn dig(&self, block: &Block) -> Result<(), SessionError> {
        let delay = self.world.state().dig_delay;
        self.world.record(MockAction::Dig(block.name.clone()));
        tokio::time::sleep(delay).await;
        let removed = {
            let mut state = self.world.state();
            let before = state.blocks.len();
            state.blocks.retain(|b| b.position != block.position);
            state.blocks.len() != before
        };
        if !removed {
            return Err(SessionError::NotFound(block.name.clone()));
        }
        self.world.give(Item::new(block.name.replace("_ore", ""), 1));
        Ok(())
    }

    async fn fish(&self) -> Result<Option<Item>, SessionError> {
        let (supported, delay) = {
            let state = self.world.state();
            (state.fishing_supported, state.fish_delay)
        };
        if !supported {
            return Err(SessionError::Unsupported("fishing".to_string()));
        }
        self.world.record(MockAction::Fish);
        tokio::time::sleep(delay).await;
        let catch = Item::new("cod", 1);
        self.world.give(catch.clone());
        Ok(Some(catch))
    }
}

#[derive(Default)]
struct ConnectorState {
    connects: u32,
    fail_remaining: u32,
    hang: bool,
    last_options: Option<ConnectOptions>,
}

/// 模拟连接工厂：支持注入失败、挂起（用于连接超时）与自动 spawn
#[derive(Clone)]
pub struct MockConnector {
    world: MockWorld,
    auto_spawn: bool,
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new(world: MockWorld) -> Self {
        Self {
            world,
            auto_spawn: true,
            state: Arc::new(Mutex::new(ConnectorState::default())),
        }
    }

    /// 连接成功后不自动发送 Spawn
    pub fn without_auto_spawn(mut self) -> Self {
        self.auto_spawn = false;
        self
    }

    fn state(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn world(&self) -> &MockWorld {
        &self.world
    }

    /// 接下来 n 次连接直接失败
    pub fn fail_next(&self, n: u32) {
        self.state().fail_remaining = n;
    }

    /// 连接调用永不返回
    pub fn set_hang(&self, hang: bool) {
        self.state().hang = hang;
    }

    pub fn connect_count(&self) -> u32 {
        self.state().connects
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.state().last_options.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Session, SessionError> {
        let (fail, hang) = {
            let mut state = self.state();
            state.connects += 1;
            state.last_options = Some(options.clone());
            let fail = state.fail_remaining > 0;
            if fail {
                state.fail_remaining -= 1;
            }
            (fail, state.hang)
        };
        if fail {
            return Err(SessionError::Protocol("connection refused".to_string()));
        }
        if hang {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.world.set_username(&options.username);
        if self.auto_spawn {
            let _ = tx.send(SessionEvent::Spawn);
        }
        self.world.attach_events(tx);
        Ok(Session {
            client: self.world.client(),
            events: rx,
        })
    }
}

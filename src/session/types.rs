//! 会话层数据类型：坐标、实体、物品、方块、会话事件

use serde::{Deserialize, Serialize};

/// 世界坐标
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Vec3) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Vec3 {
        Vec3::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// 向下取整后的方块坐标（用于状态展示与聊天回复）
    pub fn floored(&self) -> (i64, i64, i64) {
        (
            self.x.floor() as i64,
            self.y.floor() as i64,
            self.z.floor() as i64,
        )
    }
}

pub type EntityId = u64;

/// 实体分类（攻击 / 守卫的目标筛选依据）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Hostile,
    Passive,
    Other,
}

/// 附近实体快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// 玩家为用户名，生物为类型名
    pub name: String,
    pub kind: EntityKind,
    pub position: Vec3,
    pub height: f64,
}

impl Entity {
    /// 眼睛高度位置（看向实体时使用）
    pub fn eye_position(&self) -> Vec3 {
        self.position.offset(0.0, self.height * 0.85, 0.0)
    }
}

/// 背包物品
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub count: u32,
}

impl Item {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// 方块（挖矿目标）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub position: Vec3,
}

/// 交给寻路能力的目标（寻路内部不在本系统范围内）
#[derive(Debug, Clone, PartialEq)]
pub enum MovementGoal {
    /// 走到坐标附近（容差内即算到达）
    Near { point: Vec3, tolerance: f64 },
    /// 持续跟随实体，保持距离
    Follow { entity: EntityId, distance: f64 },
}

/// 按键控制状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    Forward,
    Back,
    Left,
    Right,
    Jump,
    Sneak,
    Sprint,
}

/// 会话入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Spawn,
    Death,
    Respawn,
    Move(Vec3),
    Health { health: f32, food: f32 },
    Chat { username: String, message: String },
    PlayerJoined(String),
    PlayerLeft(String),
    Kicked(String),
    Error(String),
    End,
}

impl SessionEvent {
    /// 终止型事件：触发拆除并重连
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Kicked(_) | SessionEvent::Error(_) | SessionEvent::End
        )
    }
}

/// 建立会话所需参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// None 表示自动探测
    pub version: Option<String>,
}

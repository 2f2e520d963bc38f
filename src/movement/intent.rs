//! 移动意图与优先级

use serde::Serialize;

use crate::session::{EntityId, MovementGoal, Vec3};

/// 「身体此刻应该做什么」，每个代理同一时刻只有一个生效
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MovementIntent {
    #[default]
    Idle,
    GoTo { point: Vec3, tolerance: f64 },
    FollowEntity { entity: EntityId, standoff: f64 },
    /// 原地不动（钓鱼等需要站定的活动）
    HoldPosition,
}

impl MovementIntent {
    /// 与已下发的意图是否指向同一目标；是则无需重新寻路
    pub fn same_target(&self, applied: &MovementIntent) -> bool {
        match (self, applied) {
            (MovementIntent::Idle, MovementIntent::Idle) => true,
            (MovementIntent::HoldPosition, MovementIntent::HoldPosition) => true,
            (
                MovementIntent::GoTo { point, .. },
                MovementIntent::GoTo {
                    point: prev,
                    tolerance,
                },
            ) => point.distance_to(prev) <= *tolerance,
            (
                MovementIntent::FollowEntity { entity, standoff },
                MovementIntent::FollowEntity {
                    entity: prev_entity,
                    standoff: prev_standoff,
                },
            ) => entity == prev_entity && (standoff - prev_standoff).abs() < f64::EPSILON,
            _ => false,
        }
    }

    /// 转换为寻路目标；Idle / HoldPosition 对应停止移动
    pub fn goal(&self) -> Option<MovementGoal> {
        match self {
            MovementIntent::GoTo { point, tolerance } => Some(MovementGoal::Near {
                point: *point,
                tolerance: *tolerance,
            }),
            MovementIntent::FollowEntity { entity, standoff } => Some(MovementGoal::Follow {
                entity: *entity,
                distance: *standoff,
            }),
            MovementIntent::Idle | MovementIntent::HoldPosition => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, MovementIntent::Idle)
    }
}

/// 移动请求优先级（从低到高声明，派生的 Ord 即排序依据）
///
/// 取值留有间隔，便于以后插入新的层级。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementPriority {
    /// Humanize / SafeIdle 的填充动作
    Filler = 0,
    Patrol = 10,
    /// 挖矿 / 钓鱼
    Gathering = 20,
    Follow = 30,
    Attack = 40,
    /// 守卫 / 自卫
    Guard = 50,
}

impl MovementPriority {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

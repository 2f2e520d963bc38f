//! 自动攻击：范围内最近的合格目标
//!
//! 只看向并攻击，不发起移动请求（追击由 Guard 负责）。自身生命值降到下限即自动停止。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};

use super::options::Options;
use super::runner::{BehaviorCore, TickOutcome};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus, TargetMode};
use crate::core::{KeeperError, Result, StopReason};
use crate::session::{Entity, EntityKind};

#[derive(Debug, Default)]
struct AttackState {
    mode: TargetMode,
    range: f64,
    last_target: Option<String>,
    attacks: u64,
}

pub struct AttackBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<AttackState>>,
}

fn lock(state: &Mutex<AttackState>) -> MutexGuard<'_, AttackState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 目标是否符合筛选模式与白名单
pub fn is_target(entity: &Entity, mode: TargetMode, whitelist: &[String]) -> bool {
    if whitelist.iter().any(|name| name == &entity.name) {
        return false;
    }
    match mode {
        TargetMode::Hostile => entity.kind == EntityKind::Hostile,
        TargetMode::Player => entity.kind == EntityKind::Player,
        TargetMode::All => entity.kind != EntityKind::Other,
    }
}

impl AttackBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::Attack, ctx),
            state: Arc::new(Mutex::new(AttackState::default())),
        }
    }
}

impl Behavior for AttackBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Attack
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.attack;
        let opts = Options::parse(options)?;
        let mode = match opts.str("mode")? {
            Some(m) => m.parse::<TargetMode>()?,
            None => cfg.mode,
        };
        let range = opts.f64("range", cfg.range)?;
        let health_floor = opts.f32("healthFloor", cfg.health_floor)?;
        let whitelist = opts.strings("whitelist", &cfg.whitelist)?;
        let interval = opts.millis("intervalMs", cfg.interval_ms)?;

        if self.core.is_active() {
            return Err(KeeperError::AlreadyActive(BehaviorKind::Attack));
        }
        if let Some(health) = ctx.handle.health() {
            if health <= health_floor {
                return Err(KeeperError::PreconditionFailed(format!(
                    "health {} is at or below floor {}",
                    health, health_floor
                )));
            }
        }

        let activation = self.core.activate()?;
        *lock(&self.state) = AttackState {
            mode,
            range,
            ..AttackState::default()
        };

        let handle = ctx.handle.clone();
        let state = Arc::clone(&self.state);
        self.core.spawn_ticker(
            &activation,
            move || interval,
            move || {
                if let Some(health) = handle.health() {
                    if health <= health_floor {
                        return Ok(TickOutcome::AutoStop(StopReason::LowHealth));
                    }
                }
                let mut st = lock(&state);
                match handle.nearest_entity(range, |e| is_target(e, mode, &whitelist)) {
                    Some((target, _)) => {
                        handle.look_at(target.eye_position());
                        handle.attack(target.id);
                        st.attacks += 1;
                        st.last_target = Some(target.name);
                    }
                    None => st.last_target = None,
                }
                Ok(TickOutcome::Continue)
            },
        );
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        self.core.stop_ack()
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "mode": st.mode,
            "range": st.range,
            "lastTarget": st.last_target,
            "attacks": st.attacks,
        }))
    }
}

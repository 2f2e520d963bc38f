//! 守卫：追击半径内最近的敌对生物，进入打击距离后原地攻击
//!
//! 追击请求有重发冷却，目标在几个敌人之间抖动时不会反复改写移动目标。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tokio::time::Instant;

use super::options::Options;
use super::runner::{BehaviorCore, TickOutcome};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::{KeeperError, Result, StopReason};
use crate::movement::{MovementIntent, MovementPriority};
use crate::session::{EntityId, EntityKind};

#[derive(Debug, Default)]
struct GuardState {
    radius: f64,
    target: Option<String>,
    pursuing: Option<EntityId>,
    last_pursuit: Option<Instant>,
    strikes: u64,
}

pub struct GuardBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<GuardState>>,
}

fn lock(state: &Mutex<GuardState>) -> MutexGuard<'_, GuardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GuardBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::Guard, ctx),
            state: Arc::new(Mutex::new(GuardState::default())),
        }
    }
}

impl Behavior for GuardBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Guard
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.guard;
        let opts = Options::parse(options)?;
        let interval = opts.millis("intervalMs", cfg.interval_ms)?;
        let radius = opts.f64("radius", cfg.radius)?;
        let strike_range = opts.f64("strikeRange", cfg.strike_range)?;
        let health_floor = opts.f32("healthFloor", cfg.health_floor)?;
        let cooldown = opts.millis("reissueCooldownMs", cfg.reissue_cooldown_ms)?;
        let standoff = opts.f64("standoff", cfg.standoff)?;

        if self.core.is_active() {
            return Err(KeeperError::AlreadyActive(BehaviorKind::Guard));
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
        *lock(&self.state) = GuardState {
            radius,
            ..GuardState::default()
        };

        let handle = ctx.handle.clone();
        let arbiter = Arc::clone(&ctx.arbiter);
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
                let now = Instant::now();
                let Some((enemy, distance)) =
                    handle.nearest_entity(radius, |e| e.kind == EntityKind::Hostile)
                else {
                    if st.pursuing.take().is_some() || st.target.is_some() {
                        arbiter.release(BehaviorKind::Guard);
                    }
                    st.target = None;
                    return Ok(TickOutcome::Continue);
                };

                st.target = Some(enemy.name.clone());
                if distance > strike_range {
                    let switching = st.pursuing != Some(enemy.id);
                    let cooled = st
                        .last_pursuit
                        .map(|at| now.duration_since(at) >= cooldown)
                        .unwrap_or(true);
                    if !switching || cooled {
                        arbiter.request(
                            BehaviorKind::Guard,
                            MovementIntent::FollowEntity {
                                entity: enemy.id,
                                standoff,
                            },
                            MovementPriority::Guard,
                        );
                        if switching {
                            st.last_pursuit = Some(now);
                        }
                        st.pursuing = Some(enemy.id);
                    }
                } else {
                    arbiter.request(
                        BehaviorKind::Guard,
                        MovementIntent::HoldPosition,
                        MovementPriority::Guard,
                    );
                    st.pursuing = None;
                    handle.look_at(enemy.eye_position());
                    handle.attack(enemy.id);
                    st.strikes += 1;
                }
                Ok(TickOutcome::Continue)
            },
        );
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let ack = self.core.stop_ack();
        let mut st = lock(&self.state);
        st.pursuing = None;
        st.target = None;
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "radius": st.radius,
            "target": st.target,
            "pursuing": st.pursuing,
            "strikes": st.strikes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::{context, mob};
    use crate::session::{MockAction, MockWorld, MovementGoal, Vec3};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_pursues_then_strikes() {
        let world = MockWorld::new();
        world.set_instant_travel(false);
        world.add_entity(mob(9, "zombie", EntityKind::Hostile, Vec3::new(10.0, 64.0, 0.0)));
        let (ctx, _rx) = context(&world);
        let arbiter = Arc::clone(&ctx.arbiter);
        let guard = GuardBehavior::new(ctx);
        guard.start(&Value::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            world.count_actions(|a| matches!(
                a,
                MockAction::SetGoal(MovementGoal::Follow { entity: 9, .. })
            )),
            1
        );
        assert_eq!(world.count_actions(|a| matches!(a, MockAction::Attack(_))), 0);

        world.set_position(Vec3::new(8.0, 64.0, 0.0));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(world.count_actions(|a| *a == MockAction::Attack(9)), 1);
        assert_eq!(arbiter.live(), MovementIntent::HoldPosition);
        guard.stop();
        assert!(arbiter.live().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reissue_cooldown_prevents_thrashing() {
        let world = MockWorld::new();
        world.set_instant_travel(false);
        world.add_entity(mob(1, "zombie", EntityKind::Hostile, Vec3::new(10.0, 64.0, 0.0)));
        let (ctx, _rx) = context(&world);
        let guard = GuardBehavior::new(ctx);
        guard.start(&json!({"reissueCooldownMs": 2000})).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // 更近的敌人出现，但仍在冷却期内
        world.add_entity(mob(2, "husk", EntityKind::Hostile, Vec3::new(0.0, 64.0, 9.0)));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(guard.status().detail["pursuing"], 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(guard.status().detail["pursuing"], 2);
        guard.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_health_auto_stops() {
        let world = MockWorld::new();
        let (ctx, mut rx) = context(&world);
        let guard = GuardBehavior::new(ctx);
        guard.start(&Value::Null).unwrap();
        world.set_health(4.0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!guard.is_active());
        assert_eq!(rx.try_recv().unwrap().reason, StopReason::LowHealth);
    }
}

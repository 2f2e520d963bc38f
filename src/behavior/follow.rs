//! 跟随玩家
//!
//! 距离超过 maxDistance 时请求 FollowEntity，进入 minDistance 后撤回请求；
//! 连续 maxUnseenTicks 个 tick 看不到目标即以 `target_lost` 自动停止。
//! `untilArrived` 为 true 时到达 minDistance 内即结束（`!come`）。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};

use super::options::Options;
use super::runner::{BehaviorCore, TickOutcome};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::{KeeperError, Result, StopReason};
use crate::movement::{MovementIntent, MovementPriority};

#[derive(Debug, Default)]
struct FollowState {
    target: Option<String>,
    unseen_ticks: u32,
    last_distance: Option<f64>,
    following: bool,
}

pub struct FollowBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<FollowState>>,
}

fn lock(state: &Mutex<FollowState>) -> MutexGuard<'_, FollowState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FollowBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::Follow, ctx),
            state: Arc::new(Mutex::new(FollowState::default())),
        }
    }
}

impl Behavior for FollowBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Follow
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.follow;
        let opts = Options::parse(options)?;
        let target = opts
            .str("target")?
            .or_else(|| opts.str("player").ok().flatten())
            .ok_or_else(|| KeeperError::InvalidOptions("'target' is required".to_string()))?;
        let interval = opts.millis("intervalMs", cfg.interval_ms)?;
        let max_unseen = opts.u64("maxUnseenTicks", u64::from(cfg.max_unseen_ticks))?;
        let max_unseen = u32::try_from(max_unseen).map_err(|_| {
            KeeperError::InvalidOptions(format!("'maxUnseenTicks' must be at most {}", u32::MAX))
        })?;
        let until_arrived = opts.bool("untilArrived", false)?;
        let min_distance = opts.f64("minDistance", cfg.min_distance)?;
        let max_distance = opts.f64("maxDistance", cfg.max_distance)?.max(min_distance);

        if self.core.is_active() {
            return Err(KeeperError::AlreadyActive(BehaviorKind::Follow));
        }
        if ctx.handle.player_entity(&target).is_none() {
            return Err(KeeperError::PreconditionFailed(format!(
                "target '{}' is not visible",
                target
            )));
        }

        let activation = self.core.activate()?;
        *lock(&self.state) = FollowState {
            target: Some(target.clone()),
            ..FollowState::default()
        };

        let handle = ctx.handle.clone();
        let arbiter = Arc::clone(&ctx.arbiter);
        let state = Arc::clone(&self.state);
        self.core.spawn_ticker(
            &activation,
            move || interval,
            move || {
                let mut st = lock(&state);
                let Some(me) = handle.position() else {
                    return Ok(TickOutcome::Continue);
                };
                match handle.player_entity(&target) {
                    None => {
                        st.unseen_ticks += 1;
                        st.last_distance = None;
                        if st.unseen_ticks >= max_unseen {
                            return Ok(TickOutcome::AutoStop(StopReason::TargetLost));
                        }
                    }
                    Some(entity) => {
                        st.unseen_ticks = 0;
                        let distance = me.distance_to(&entity.position);
                        st.last_distance = Some(distance);
                        if distance > max_distance {
                            arbiter.request(
                                BehaviorKind::Follow,
                                MovementIntent::FollowEntity {
                                    entity: entity.id,
                                    standoff: min_distance,
                                },
                                MovementPriority::Follow,
                            );
                            st.following = true;
                        } else if distance <= min_distance {
                            if until_arrived {
                                st.following = false;
                                return Ok(TickOutcome::Finished);
                            }
                            if st.following {
                                arbiter.release(BehaviorKind::Follow);
                                st.following = false;
                            }
                        }
                    }
                }
                Ok(TickOutcome::Continue)
            },
        );
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let ack = self.core.stop_ack();
        lock(&self.state).following = false;
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "target": st.target,
            "unseenTicks": st.unseen_ticks,
            "distance": st.last_distance,
            "following": st.following,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::{context, player};
    use crate::session::{MockAction, MockWorld, MovementGoal, Vec3};
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_requires_visible_target() {
        let world = MockWorld::new();
        let (ctx, _rx) = context(&world);
        let follow = FollowBehavior::new(ctx);
        let err = follow.start(&json!({"target": "alice"})).unwrap_err();
        assert!(matches!(err, KeeperError::PreconditionFailed(_)));
        assert!(!follow.status().active);

        let err = follow.start(&Value::Null).unwrap_err();
        assert!(matches!(err, KeeperError::InvalidOptions(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_only_beyond_max_distance() {
        let world = MockWorld::new();
        world.set_instant_travel(false);
        world.add_entity(player(7, "alice", Vec3::new(10.0, 64.0, 0.0)));
        let (ctx, _rx) = context(&world);
        let follow = FollowBehavior::new(ctx);
        follow.start(&json!({"target": "alice"})).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            world.count_actions(|a| matches!(
                a,
                MockAction::SetGoal(MovementGoal::Follow { entity: 7, .. })
            )),
            1
        );

        // 进入最小距离后撤回请求
        world.set_position(Vec3::new(9.0, 64.0, 0.0));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(follow.core.ctx().arbiter.live().is_idle());
        follow.stop();
    }

    #[tokio::test]
    async fn test_rejects_max_unseen_ticks_beyond_u32() {
        let world = MockWorld::new();
        world.add_entity(player(7, "alice", Vec3::new(1.0, 64.0, 0.0)));
        let (ctx, _rx) = context(&world);
        let follow = FollowBehavior::new(ctx);
        let err = follow
            .start(&json!({"target": "alice", "maxUnseenTicks": u64::from(u32::MAX) + 1}))
            .unwrap_err();
        assert!(matches!(err, KeeperError::InvalidOptions(_)));
        assert!(!follow.status().active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_arrived_finishes_silently() {
        let world = MockWorld::new();
        world.set_instant_travel(false);
        world.add_entity(player(7, "alice", Vec3::new(10.0, 64.0, 0.0)));
        let (ctx, mut rx) = context(&world);
        let arbiter = Arc::clone(&ctx.arbiter);
        let follow = FollowBehavior::new(ctx);
        follow
            .start(&json!({"target": "alice", "untilArrived": true}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!arbiter.live().is_idle());

        world.set_position(Vec3::new(9.0, 64.0, 0.0));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = follow.status();
        assert!(!status.active);
        assert_eq!(status.stop_reason, None);
        assert_eq!(status.last_result.as_deref(), Some("finished"));
        assert!(arbiter.live().is_idle());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_lost_auto_stops_once() {
        let world = MockWorld::new();
        world.add_entity(player(7, "alice", Vec3::new(1.0, 64.0, 0.0)));
        let (ctx, mut rx) = context(&world);
        let follow = FollowBehavior::new(ctx);
        follow.start(&json!({"target": "alice"})).unwrap();
        world.remove_entity(7);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let status = follow.status();
        assert!(!status.active);
        assert_eq!(status.stop_reason, Some(StopReason::TargetLost));
        assert_eq!(rx.try_recv().unwrap().reason, StopReason::TargetLost);
        assert!(rx.try_recv().is_err());
    }
}

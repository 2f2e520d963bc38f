//! 空闲模拟：AntiAfk / Humanize / SafeIdle
//!
//! 三者共用一个实现，区别只在默认间隔与微动作权重。每次 tick 按权重随机选一个微动作
//! （环顾、小步移动、潜行切换、挥手、跳跃），间隔带随机抖动。
//! SafeIdle 额外做卡死检测：正在移动但位置长时间无进展时强制停止移动。

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::options::Options;
use super::runner::{BehaviorCore, TickOutcome};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::{KeeperError, Result};
use crate::movement::{MovementArbiter, MovementIntent, MovementPriority};
use crate::session::{AgentHandle, ControlState, Vec3};

const JUMP_PULSE: Duration = Duration::from_millis(100);
const MIN_INTERVAL: Duration = Duration::from_millis(200);
/// 低于该位移视为没有进展
const PROGRESS_EPSILON: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MicroAction {
    LookAround,
    Step,
    ToggleSneak,
    Swing,
    Jump,
}

/// 每种空闲行为的默认参数
#[derive(Debug, Clone)]
struct IdleProfile {
    interval: Duration,
    weights: [(MicroAction, u32); 5],
    stuck_detection: bool,
}

impl IdleProfile {
    fn for_kind(kind: BehaviorKind, ctx: &BehaviorContext) -> Self {
        let cfg = &ctx.config.idle;
        match kind {
            BehaviorKind::AntiAfk => Self {
                interval: Duration::from_millis(cfg.anti_afk_interval_ms),
                weights: [
                    (MicroAction::LookAround, 3),
                    (MicroAction::Step, 1),
                    (MicroAction::ToggleSneak, 1),
                    (MicroAction::Swing, 2),
                    (MicroAction::Jump, 3),
                ],
                stuck_detection: false,
            },
            BehaviorKind::SafeIdle => Self {
                interval: Duration::from_millis(cfg.safe_idle_interval_ms),
                weights: [
                    (MicroAction::LookAround, 4),
                    (MicroAction::Step, 1),
                    (MicroAction::ToggleSneak, 0),
                    (MicroAction::Swing, 1),
                    (MicroAction::Jump, 0),
                ],
                stuck_detection: true,
            },
            _ => Self {
                interval: Duration::from_millis(cfg.humanize_interval_ms),
                weights: [
                    (MicroAction::LookAround, 5),
                    (MicroAction::Step, 2),
                    (MicroAction::ToggleSneak, 1),
                    (MicroAction::Swing, 1),
                    (MicroAction::Jump, 1),
                ],
                stuck_detection: false,
            },
        }
    }
}

/// 在 base 上施加 ±jitter 比例的随机抖动
pub fn jittered(base: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    if jitter == 0.0 {
        return base.max(MIN_INTERVAL);
    }
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    base.mul_f64(factor).max(MIN_INTERVAL)
}

#[derive(Debug, Default)]
struct IdleState {
    sneaking: bool,
    jump_pending: bool,
    stepping: bool,
    last_action: Option<MicroAction>,
    actions: u64,
    progress: Option<(Vec3, Instant)>,
    stuck_events: u64,
}

struct IdleTick {
    kind: BehaviorKind,
    agent_id: String,
    handle: AgentHandle,
    arbiter: Arc<MovementArbiter>,
    chooser: WeightedIndex<u32>,
    actions: Vec<MicroAction>,
    step_distance: f64,
    stuck_timeout: Duration,
    stuck_detection: bool,
}

impl IdleTick {
    fn run(&self, st: &mut IdleState) -> Result<TickOutcome> {
        if st.jump_pending {
            self.handle.set_control_state(ControlState::Jump, false);
            st.jump_pending = false;
            return Ok(TickOutcome::Continue);
        }
        if self.stuck_detection {
            self.check_progress(st);
        }
        if st.stepping && !self.handle.is_moving() {
            self.arbiter.release(self.kind);
            st.stepping = false;
        }

        let action = self.actions[self.chooser.sample(&mut rand::thread_rng())];
        let Some(pos) = self.handle.position() else {
            return Ok(TickOutcome::Continue);
        };
        let mut rng = rand::thread_rng();
        match action {
            MicroAction::LookAround => {
                let yaw = rng.gen_range(0.0..TAU);
                let pitch = rng.gen_range(-0.5..0.5);
                self.handle
                    .look_at(pos.offset(yaw.cos() * 4.0, 1.6 + pitch * 4.0, yaw.sin() * 4.0));
            }
            MicroAction::Step => {
                let yaw = rng.gen_range(0.0..TAU);
                let point = pos.offset(
                    yaw.cos() * self.step_distance,
                    0.0,
                    yaw.sin() * self.step_distance,
                );
                self.arbiter.request(
                    self.kind,
                    MovementIntent::GoTo {
                        point,
                        tolerance: 0.5,
                    },
                    MovementPriority::Filler,
                );
                st.stepping = true;
            }
            MicroAction::ToggleSneak => {
                st.sneaking = !st.sneaking;
                self.handle.set_control_state(ControlState::Sneak, st.sneaking);
            }
            MicroAction::Swing => self.handle.swing_arm(),
            MicroAction::Jump => {
                self.handle.set_control_state(ControlState::Jump, true);
                st.jump_pending = true;
            }
        }
        st.last_action = Some(action);
        st.actions += 1;
        Ok(TickOutcome::Continue)
    }

    fn check_progress(&self, st: &mut IdleState) {
        let now = Instant::now();
        let Some(pos) = self.handle.position() else {
            return;
        };
        if !self.handle.is_moving() {
            st.progress = Some((pos, now));
            return;
        }
        match st.progress {
            Some((last, _)) if last.distance_to(&pos) > PROGRESS_EPSILON => {
                st.progress = Some((pos, now));
            }
            Some((_, since)) if now.duration_since(since) >= self.stuck_timeout => {
                tracing::warn!(
                    agent = %self.agent_id,
                    owner = ?self.arbiter.owner(),
                    "Movement made no progress, forcing stop"
                );
                self.arbiter.halt();
                st.stuck_events += 1;
                st.progress = Some((pos, now));
            }
            Some(_) => {}
            None => st.progress = Some((pos, now)),
        }
    }
}

pub struct IdleBehavior {
    kind: BehaviorKind,
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<IdleState>>,
}

fn lock(state: &Mutex<IdleState>) -> MutexGuard<'_, IdleState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IdleBehavior {
    fn new(kind: BehaviorKind, ctx: BehaviorContext) -> Self {
        Self {
            kind,
            core: BehaviorCore::new(kind, ctx),
            state: Arc::new(Mutex::new(IdleState::default())),
        }
    }

    pub fn anti_afk(ctx: BehaviorContext) -> Self {
        Self::new(BehaviorKind::AntiAfk, ctx)
    }

    pub fn humanize(ctx: BehaviorContext) -> Self {
        Self::new(BehaviorKind::Humanize, ctx)
    }

    pub fn safe_idle(ctx: BehaviorContext) -> Self {
        Self::new(BehaviorKind::SafeIdle, ctx)
    }
}

impl Behavior for IdleBehavior {
    fn kind(&self) -> BehaviorKind {
        self.kind
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.idle;
        let profile = IdleProfile::for_kind(self.kind, ctx);
        let opts = Options::parse(options)?;
        let interval = opts.millis("intervalMs", profile.interval.as_millis() as u64)?;
        let jitter = opts.f64("jitter", cfg.jitter)?;
        let step_distance = opts.f64("stepDistance", cfg.step_distance)?;
        let stuck_timeout = opts.millis("stuckTimeoutMs", cfg.stuck_timeout_ms)?;

        let (actions, weights): (Vec<MicroAction>, Vec<u32>) =
            profile.weights.iter().copied().unzip();
        let chooser = WeightedIndex::new(&weights)
            .map_err(|e| KeeperError::InvalidOptions(format!("micro-action weights: {}", e)))?;

        let activation = self.core.activate()?;
        *lock(&self.state) = IdleState::default();

        let tick = IdleTick {
            kind: self.kind,
            agent_id: ctx.agent_id.clone(),
            handle: ctx.handle.clone(),
            arbiter: Arc::clone(&ctx.arbiter),
            chooser,
            actions,
            step_distance,
            stuck_timeout,
            stuck_detection: profile.stuck_detection,
        };
        let delay_state = Arc::clone(&self.state);
        let state = Arc::clone(&self.state);
        self.core.spawn_ticker(
            &activation,
            move || {
                if lock(&delay_state).jump_pending {
                    JUMP_PULSE
                } else {
                    jittered(interval, jitter)
                }
            },
            move || tick.run(&mut lock(&state)),
        );
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let ack = self.core.stop_ack();
        let handle = &self.core.ctx().handle;
        let mut st = lock(&self.state);
        if st.sneaking {
            handle.set_control_state(ControlState::Sneak, false);
            st.sneaking = false;
        }
        if st.jump_pending {
            handle.set_control_state(ControlState::Jump, false);
            st.jump_pending = false;
        }
        st.stepping = false;
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "lastAction": st.last_action,
            "actions": st.actions,
            "stuckEvents": st.stuck_events,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::context;
    use crate::session::{MockAction, MockWorld, MovementGoal};

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let d = jittered(base, 0.5);
            assert!(d >= Duration::from_secs(5) && d <= Duration::from_secs(15));
        }
        assert_eq!(jittered(base, 0.0), base);
    }

    #[tokio::test(start_paused = true)]
    async fn test_humanize_performs_micro_actions() {
        let world = MockWorld::new();
        let (ctx, _rx) = context(&world);
        let humanize = IdleBehavior::humanize(ctx);
        humanize.start(&json!({"intervalMs": 1000, "jitter": 0})).unwrap();
        tokio::time::sleep(Duration::from_millis(5500)).await;
        humanize.stop();

        let status = humanize.status();
        assert!(!status.active);
        assert!(status.detail["actions"].as_u64().unwrap() >= 3);
        assert!(!world.control(ControlState::Sneak));
        assert!(!world.control(ControlState::Jump));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_idle_halts_stuck_movement() {
        let world = MockWorld::new();
        world.set_instant_travel(false);
        let (ctx, _rx) = context(&world);
        let arbiter = Arc::clone(&ctx.arbiter);
        arbiter.request(
            BehaviorKind::Patrol,
            MovementIntent::GoTo {
                point: Vec3::new(50.0, 64.0, 0.0),
                tolerance: 1.0,
            },
            MovementPriority::Patrol,
        );
        assert!(world.actions().iter().any(|a| matches!(a, MockAction::SetGoal(_))));

        let safe_idle = IdleBehavior::safe_idle(ctx);
        safe_idle
            .start(&json!({"intervalMs": 1000, "jitter": 0, "stuckTimeoutMs": 3000}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(4500)).await;

        assert_eq!(safe_idle.status().detail["stuckEvents"], 1);
        assert!(world.actions().contains(&MockAction::StopMovement));
        // 卡住的巡逻目标被撤回，不会被下一次请求原样重发
        assert!(!arbiter.has_claim(BehaviorKind::Patrol));
        let patrol_goals = world.count_actions(|a| {
            matches!(a, MockAction::SetGoal(MovementGoal::Near { point, .. }) if point.x == 50.0)
        });
        assert_eq!(patrol_goals, 1);
        safe_idle.stop();
    }
}

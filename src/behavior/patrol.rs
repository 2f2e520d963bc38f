//! 巡逻：围绕固定中心随机走动，或按顺序循环航点
//!
//! 每次移动都有超时，到时强制撤回移动请求并换下一个目标。
//! 中心点默认取启动时的位置；重生后由监管者调用 `reset_center` 更新。

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::options::Options;
use super::runner::{BehaviorCore, TickOutcome};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::{KeeperError, Result};
use crate::movement::{MovementIntent, MovementPriority};
use crate::session::Vec3;

const MIN_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
struct PatrolMove {
    point: Vec3,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct PatrolState {
    center: Option<Vec3>,
    radius: f64,
    waypoints: Vec<Vec3>,
    index: usize,
    current: Option<PatrolMove>,
    next_move_at: Option<Instant>,
    arrivals: u64,
    timeouts: u64,
}

impl PatrolState {
    fn next_target(&mut self) -> Option<Vec3> {
        if !self.waypoints.is_empty() {
            return self.waypoints.get(self.index % self.waypoints.len()).copied();
        }
        let center = self.center?;
        let mut rng = rand::thread_rng();
        let angle = rng.gen_range(0.0..TAU);
        let dist = rng.gen_range(0.0..=self.radius.max(0.0));
        Some(center.offset(angle.cos() * dist, 0.0, angle.sin() * dist))
    }

    fn advance_waypoint(&mut self) {
        if !self.waypoints.is_empty() {
            self.index = (self.index + 1) % self.waypoints.len();
        }
    }
}

pub struct PatrolBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<PatrolState>>,
}

fn lock(state: &Mutex<PatrolState>) -> MutexGuard<'_, PatrolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PatrolBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::Patrol, ctx),
            state: Arc::new(Mutex::new(PatrolState::default())),
        }
    }

    /// 重生后把巡逻中心移到新的出生点
    pub fn reset_center(&self, center: Vec3) {
        let mut st = lock(&self.state);
        st.center = Some(center);
        st.current = None;
        if self.core.is_active() {
            tracing::info!(agent = %self.core.ctx().agent_id, ?center, "Patrol center reset");
        }
    }
}

impl Behavior for PatrolBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Patrol
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.patrol;
        let opts = Options::parse(options)?;
        let interval = opts.millis("intervalMs", cfg.interval_ms)?;
        let move_timeout = opts.millis("moveTimeoutMs", cfg.move_timeout_ms)?;
        let radius = opts.f64("radius", cfg.radius)?;
        let tolerance = opts.f64("tolerance", cfg.tolerance)?;
        let waypoints = opts.vec3_list("waypoints", &cfg.waypoints)?;
        let center = match opts.vec3("center")? {
            Some(c) => Some(c),
            None => lock(&self.state).center.or_else(|| ctx.handle.position()),
        };

        if self.core.is_active() {
            return Err(KeeperError::AlreadyActive(BehaviorKind::Patrol));
        }
        if center.is_none() && waypoints.is_empty() {
            return Err(KeeperError::PreconditionFailed(
                "position unknown, cannot pick patrol center".to_string(),
            ));
        }

        let activation = self.core.activate()?;
        *lock(&self.state) = PatrolState {
            center,
            radius,
            waypoints,
            ..PatrolState::default()
        };

        let handle = ctx.handle.clone();
        let arbiter = Arc::clone(&ctx.arbiter);
        let agent_id = ctx.agent_id.clone();
        let delay_state = Arc::clone(&self.state);
        let state = Arc::clone(&self.state);
        self.core.spawn_ticker(
            &activation,
            move || {
                let st = lock(&delay_state);
                let now = Instant::now();
                let wake = [st.next_move_at, st.current.map(|m| m.deadline)]
                    .into_iter()
                    .flatten()
                    .min();
                match wake {
                    Some(at) => at.saturating_duration_since(now).max(MIN_TICK),
                    None => interval,
                }
            },
            move || {
                let mut st = lock(&state);
                let now = Instant::now();

                if let Some(mv) = st.current {
                    let arrived = handle
                        .position()
                        .map(|p| p.distance_to(&mv.point) <= tolerance + 1.0)
                        .unwrap_or(false);
                    if arrived {
                        st.arrivals += 1;
                        st.current = None;
                        st.advance_waypoint();
                    } else if now >= mv.deadline {
                        tracing::debug!(agent = %agent_id, point = ?mv.point, "Patrol move timed out");
                        arbiter.release(BehaviorKind::Patrol);
                        st.timeouts += 1;
                        st.current = None;
                        st.advance_waypoint();
                    }
                }

                let due = st.next_move_at.map(|at| now >= at).unwrap_or(true);
                if st.current.is_none() && due {
                    if let Some(point) = st.next_target() {
                        arbiter.request(
                            BehaviorKind::Patrol,
                            MovementIntent::GoTo { point, tolerance },
                            MovementPriority::Patrol,
                        );
                        st.current = Some(PatrolMove {
                            point,
                            deadline: now + move_timeout,
                        });
                        st.next_move_at = Some(now + interval);
                    }
                } else if st.current.is_none() {
                    // 已到达，等待下一次出发
                    arbiter.release(BehaviorKind::Patrol);
                }
                Ok(TickOutcome::Continue)
            },
        );
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let ack = self.core.stop_ack();
        let mut st = lock(&self.state);
        st.current = None;
        st.next_move_at = None;
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "center": st.center,
            "radius": st.radius,
            "waypoints": st.waypoints.len(),
            "waypointIndex": st.index,
            "target": st.current.map(|m| m.point),
            "arrivals": st.arrivals,
            "timeouts": st.timeouts,
        }))
    }
}

//! 挖矿：找方块 → 走过去 → 看向 → 挖掘，循环
//!
//! 顺序异步循环，每一步都等待完成再继续。找不到目标时按 rescanMs 重扫，
//! 出错后等待 errorBackoffMs；空闲格子低于下限时以 `inventory_full` 自动停止。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use super::options::Options;
use super::runner::{Activation, BehaviorCore};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::{KeeperError, Result, StopReason};
use crate::movement::{MovementIntent, MovementPriority};
use crate::session::Block;

const ARRIVAL_POLL: Duration = Duration::from_millis(250);
/// 站在方块旁即可挖掘
const REACH: f64 = 1.0;

#[derive(Debug, Default)]
struct MiningState {
    targets: Vec<String>,
    current: Option<String>,
    mined: u64,
    failures: u64,
    phase: &'static str,
}

#[derive(Debug, Clone)]
struct MiningParams {
    targets: Vec<String>,
    range: f64,
    min_free_slots: usize,
    rescan: Duration,
    error_backoff: Duration,
    arrive_timeout: Duration,
    tolerance: f64,
}

pub struct MiningBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<MiningState>>,
}

fn lock(state: &Mutex<MiningState>) -> MutexGuard<'_, MiningState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MiningBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::Mining, ctx),
            state: Arc::new(Mutex::new(MiningState::default())),
        }
    }
}

/// 走到方块附近；超时或被取消返回 false
async fn walk_to(core: &BehaviorCore, act: &Activation, block: &Block, params: &MiningParams) -> bool {
    let ctx = core.ctx();
    ctx.arbiter.request(
        BehaviorKind::Mining,
        MovementIntent::GoTo {
            point: block.position,
            tolerance: params.tolerance,
        },
        MovementPriority::Gathering,
    );
    let deadline = Instant::now() + params.arrive_timeout;
    loop {
        let arrived = ctx
            .handle
            .position()
            .map(|p| p.distance_to(&block.position) <= params.tolerance + REACH)
            .unwrap_or(false);
        if arrived {
            return true;
        }
        if Instant::now() >= deadline || !act.pause(ARRIVAL_POLL).await {
            return false;
        }
    }
}

async fn run(core: Arc<BehaviorCore>, state: Arc<Mutex<MiningState>>, act: Activation, params: MiningParams) {
    let ctx = core.ctx().clone();
    while !act.is_cancelled() {
        let free = ctx.handle.free_slots().unwrap_or(usize::MAX);
        if free < params.min_free_slots {
            core.auto_stop(&act, StopReason::InventoryFull);
            return;
        }

        let Some(block) = ctx.handle.find_block(&params.targets, params.range) else {
            {
                let mut st = lock(&state);
                st.current = None;
                st.phase = "searching";
            }
            ctx.arbiter.release(BehaviorKind::Mining);
            if !act.pause(params.rescan).await {
                return;
            }
            continue;
        };

        {
            let mut st = lock(&state);
            st.current = Some(block.name.clone());
            st.phase = "walking";
        }
        if !walk_to(&core, &act, &block, &params).await {
            if act.is_cancelled() {
                return;
            }
            tracing::debug!(agent = %ctx.agent_id, block = %block.name, "Mining target unreachable");
            lock(&state).failures += 1;
            ctx.arbiter.release(BehaviorKind::Mining);
            if !act.pause(params.error_backoff).await {
                return;
            }
            continue;
        }

        lock(&state).phase = "digging";
        ctx.handle.look_at(block.position.offset(0.5, 0.5, 0.5));
        let dug = tokio::select! {
            biased;
            _ = act.token.cancelled() => return,
            result = ctx.handle.dig(&block) => result,
        };
        match dug {
            Ok(()) => {
                lock(&state).mined += 1;
                core.set_last_result(format!("mined {}", block.name));
            }
            Err(e) => {
                tracing::warn!(agent = %ctx.agent_id, block = %block.name, error = %e, "Mining dig failed");
                lock(&state).failures += 1;
                core.set_last_result(format!("error: {}", e));
                if !act.pause(params.error_backoff).await {
                    return;
                }
            }
        }
    }
}

impl Behavior for MiningBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Mining
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.mining;
        let opts = Options::parse(options)?;
        let params = MiningParams {
            targets: opts.strings("targets", &cfg.targets)?,
            range: opts.f64("range", cfg.range)?,
            min_free_slots: opts.u64("minFreeSlots", cfg.min_free_slots as u64)? as usize,
            rescan: opts.millis("rescanMs", cfg.rescan_ms)?,
            error_backoff: opts.millis("errorBackoffMs", cfg.error_backoff_ms)?,
            arrive_timeout: opts.millis("arriveTimeoutMs", cfg.arrive_timeout_ms)?,
            tolerance: opts.f64("tolerance", cfg.tolerance)?,
        };
        if params.targets.is_empty() {
            return Err(KeeperError::InvalidOptions("'targets' must not be empty".to_string()));
        }

        if self.core.is_active() {
            return Err(KeeperError::AlreadyActive(BehaviorKind::Mining));
        }
        if let Some(free) = ctx.handle.free_slots() {
            if free < params.min_free_slots {
                return Err(KeeperError::PreconditionFailed("inventory is full".to_string()));
            }
        }

        let activation = self.core.activate()?;
        *lock(&self.state) = MiningState {
            targets: params.targets.clone(),
            phase: "searching",
            ..MiningState::default()
        };
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .spawn_loop(&activation, move |act| run(core, state, act, params));
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let ack = self.core.stop_ack();
        let mut st = lock(&self.state);
        st.current = None;
        st.phase = "idle";
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "targets": st.targets,
            "current": st.current,
            "phase": st.phase,
            "mined": st.mined,
            "failures": st.failures,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::context;
    use crate::session::{MockAction, MockWorld, Vec3};

    fn ore(name: &str, x: f64) -> Block {
        Block {
            name: name.to_string(),
            position: Vec3::new(x, 60.0, 0.0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mines_reachable_blocks() {
        let world = MockWorld::new();
        world.add_block(ore("iron_ore", 5.0));
        world.add_block(ore("coal_ore", 10.0));
        world.add_block(ore("stone", 2.0));
        let (ctx, _rx) = context(&world);
        let mining = MiningBehavior::new(ctx);
        mining.start(&Value::Null).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(mining.status().detail["mined"], 2);
        assert_eq!(world.count_actions(|a| matches!(a, MockAction::Dig(_))), 2);
        assert_eq!(mining.status().detail["phase"], "searching");
        mining.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inventory_full_auto_stops() {
        let world = MockWorld::new();
        world.set_free_slots(1);
        world.add_block(ore("iron_ore", 5.0));
        world.add_block(ore("gold_ore", 6.0));
        let (ctx, mut rx) = context(&world);
        let mining = MiningBehavior::new(ctx);
        mining.start(&Value::Null).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let status = mining.status();
        assert!(!status.active);
        assert_eq!(status.stop_reason, Some(StopReason::InventoryFull));
        assert_eq!(rx.try_recv().unwrap().reason, StopReason::InventoryFull);
        assert_eq!(status.detail["mined"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_dig() {
        let world = MockWorld::new();
        world.add_block(ore("diamond_ore", 3.0));
        let (ctx, _rx) = context(&world);
        let mining = MiningBehavior::new(ctx);
        mining.start(&Value::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        mining.stop();
        mining.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mining.status().detail["mined"], 0);
        assert!(!mining.status().active);
    }
}

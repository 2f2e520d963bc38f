//! 钓鱼：抛竿 → 等待上钩或超时 → 重复
//!
//! 需要背包里有鱼竿；鱼竿丢失以 `rod_missing` 自动停止，协议端不支持钓鱼以
//! `capability_unsupported` 自动停止。钓鱼期间以 HoldPosition 占住移动能力。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};

use super::options::Options;
use super::runner::{Activation, BehaviorCore};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::{KeeperError, Result, SessionError, StopReason};
use crate::movement::{MovementIntent, MovementPriority};

#[derive(Debug, Default)]
struct FishingState {
    casts: u64,
    caught: u64,
    timeouts: u64,
    last_catch: Option<String>,
}

#[derive(Debug, Clone)]
struct FishingParams {
    rod: String,
    cast_timeout: Duration,
    error_backoff: Duration,
}

pub struct FishingBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<FishingState>>,
}

fn lock(state: &Mutex<FishingState>) -> MutexGuard<'_, FishingState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FishingBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::Fishing, ctx),
            state: Arc::new(Mutex::new(FishingState::default())),
        }
    }
}

fn unsupported_reason(err: &SessionError) -> Option<StopReason> {
    match err {
        SessionError::Unsupported(_) => Some(StopReason::CapabilityUnsupported),
        SessionError::NotFound(_) => Some(StopReason::RodMissing),
        _ => None,
    }
}

async fn run(core: Arc<BehaviorCore>, state: Arc<Mutex<FishingState>>, act: Activation, params: FishingParams) {
    let ctx = core.ctx().clone();
    ctx.arbiter.request(
        BehaviorKind::Fishing,
        MovementIntent::HoldPosition,
        MovementPriority::Gathering,
    );

    while !act.is_cancelled() {
        if ctx.handle.find_item(|name| name == params.rod).is_none() {
            core.auto_stop(&act, StopReason::RodMissing);
            return;
        }

        let equipped = tokio::select! {
            biased;
            _ = act.token.cancelled() => return,
            result = ctx.handle.equip(&params.rod) => result,
        };
        if let Err(e) = equipped {
            if let Some(reason) = unsupported_reason(&e) {
                core.auto_stop(&act, reason);
                return;
            }
            tracing::warn!(agent = %ctx.agent_id, error = %e, "Failed to equip fishing rod");
            if !act.pause(params.error_backoff).await {
                return;
            }
            continue;
        }

        lock(&state).casts += 1;
        let cast = tokio::select! {
            biased;
            _ = act.token.cancelled() => return,
            result = tokio::time::timeout(params.cast_timeout, ctx.handle.fish()) => result,
        };
        match cast {
            Ok(Ok(Some(item))) => {
                let mut st = lock(&state);
                st.caught += 1;
                st.last_catch = Some(item.name.clone());
                core.set_last_result(format!("caught {}", item.name));
            }
            Ok(Ok(None)) => core.set_last_result("nothing caught"),
            Ok(Err(e)) => {
                if let SessionError::Unsupported(_) = e {
                    core.auto_stop(&act, StopReason::CapabilityUnsupported);
                    return;
                }
                tracing::warn!(agent = %ctx.agent_id, error = %e, "Fishing cast failed");
                core.set_last_result(format!("error: {}", e));
                if !act.pause(params.error_backoff).await {
                    return;
                }
            }
            Err(_) => {
                tracing::debug!(agent = %ctx.agent_id, "Fishing cast timed out");
                lock(&state).timeouts += 1;
                core.set_last_result("cast timed out");
            }
        }
    }
}

impl Behavior for FishingBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Fishing
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.fishing;
        let opts = Options::parse(options)?;
        let params = FishingParams {
            rod: opts.str("rodItem")?.unwrap_or_else(|| cfg.rod_item.clone()),
            cast_timeout: opts.seconds("castTimeoutSecs", cfg.cast_timeout_secs as f64)?,
            error_backoff: opts.millis("errorBackoffMs", cfg.error_backoff_ms)?,
        };

        if self.core.is_active() {
            return Err(KeeperError::AlreadyActive(BehaviorKind::Fishing));
        }
        if ctx.handle.find_item(|name| name == params.rod).is_none() {
            return Err(KeeperError::PreconditionFailed(format!(
                "no {} in inventory",
                params.rod
            )));
        }

        let activation = self.core.activate()?;
        *lock(&self.state) = FishingState::default();
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .spawn_loop(&activation, move |act| run(core, state, act, params));
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        self.core.stop_ack()
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "casts": st.casts,
            "caught": st.caught,
            "timeouts": st.timeouts,
            "lastCatch": st.last_catch,
        }))
    }
}

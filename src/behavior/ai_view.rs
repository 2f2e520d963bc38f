//! AI 视角：持续看向范围内最近的玩家

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};

use super::options::Options;
use super::runner::{BehaviorCore, TickOutcome};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::Result;
use crate::session::EntityKind;

#[derive(Debug, Default)]
struct AiViewState {
    range: f64,
    last_target: Option<String>,
}

pub struct AiViewBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<AiViewState>>,
}

fn lock(state: &Mutex<AiViewState>) -> MutexGuard<'_, AiViewState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AiViewBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::AiView, ctx),
            state: Arc::new(Mutex::new(AiViewState::default())),
        }
    }
}

impl Behavior for AiViewBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::AiView
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.ai_view;
        let opts = Options::parse(options)?;
        let interval = opts.millis("intervalMs", cfg.interval_ms)?;
        let range = opts.f64("range", cfg.range)?;

        let activation = self.core.activate()?;
        *lock(&self.state) = AiViewState {
            range,
            last_target: None,
        };

        let handle = ctx.handle.clone();
        let state = Arc::clone(&self.state);
        self.core.spawn_ticker(
            &activation,
            move || interval,
            move || {
                let nearest = handle.nearest_entity(range, |e| e.kind == EntityKind::Player);
                let mut st = lock(&state);
                match nearest {
                    Some((player, _)) => {
                        handle.look_at(player.eye_position());
                        st.last_target = Some(player.name);
                    }
                    None => st.last_target = None,
                }
                Ok(TickOutcome::Continue)
            },
        );
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let ack = self.core.stop_ack();
        lock(&self.state).last_target = None;
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "range": st.range,
            "lastTarget": st.last_target,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::{context, player};
    use crate::session::{MockAction, MockWorld, Vec3};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_looks_at_nearest_player() {
        let world = MockWorld::new();
        world.add_entity(player(1, "alice", Vec3::new(5.0, 64.0, 0.0)));
        world.add_entity(player(2, "bob", Vec3::new(30.0, 64.0, 0.0)));
        let (ctx, _rx) = context(&world);
        let view = AiViewBehavior::new(ctx);
        view.start(&Value::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(view.status().detail["lastTarget"], "alice");
        assert!(world
            .actions()
            .iter()
            .any(|a| matches!(a, MockAction::LookAt(p) if (p.x - 5.0).abs() < 1e-9)));
        view.stop();
        assert!(view.status().detail["lastTarget"].is_null());
    }
}

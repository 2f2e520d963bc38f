//! 自动进食：生命值或饱食度低于下限且背包里有食物时吃东西

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};

use super::options::Options;
use super::runner::{BehaviorCore, TickOutcome};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::Result;
use crate::session::AgentHandle;

#[derive(Debug, Default)]
struct AutoEatState {
    meals: u64,
    last_food: Option<String>,
    hungry_without_food: bool,
}

pub struct AutoEatBehavior {
    core: Arc<BehaviorCore>,
    state: Arc<Mutex<AutoEatState>>,
    eating: Arc<AtomicBool>,
}

fn lock(state: &Mutex<AutoEatState>) -> MutexGuard<'_, AutoEatState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 按偏好顺序找背包里的第一种食物
pub fn pick_food(handle: &AgentHandle, foods: &[String]) -> Option<String> {
    let inventory = handle.inventory();
    foods
        .iter()
        .find(|food| inventory.iter().any(|i| i.count > 0 && &i.name == *food))
        .cloned()
}

impl AutoEatBehavior {
    pub fn new(ctx: BehaviorContext) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::AutoEat, ctx),
            state: Arc::new(Mutex::new(AutoEatState::default())),
            eating: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Behavior for AutoEatBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::AutoEat
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let ctx = self.core.ctx();
        let cfg = &ctx.config.auto_eat;
        let opts = Options::parse(options)?;
        let interval = opts.millis("intervalMs", cfg.interval_ms)?;
        let health_floor = opts.f32("healthFloor", cfg.health_floor)?;
        let food_floor = opts.f32("foodFloor", cfg.food_floor)?;
        let foods = opts.strings("foods", &cfg.foods)?;

        let activation = self.core.activate()?;
        *lock(&self.state) = AutoEatState::default();
        self.eating.store(false, Ordering::SeqCst);

        let core = Arc::clone(&self.core);
        let handle = ctx.handle.clone();
        let agent_id = ctx.agent_id.clone();
        let state = Arc::clone(&self.state);
        let eating = Arc::clone(&self.eating);
        let act = activation.clone();
        self.core.spawn_ticker(
            &activation,
            move || interval,
            move || {
                if eating.load(Ordering::SeqCst) {
                    return Ok(TickOutcome::Continue);
                }
                let health = handle.health().unwrap_or(20.0);
                let food = handle.food().unwrap_or(20.0);
                if health >= health_floor && food >= food_floor {
                    lock(&state).hungry_without_food = false;
                    return Ok(TickOutcome::Continue);
                }
                let Some(item) = pick_food(&handle, &foods) else {
                    let mut st = lock(&state);
                    if !st.hungry_without_food {
                        tracing::info!(agent = %agent_id, health, food, "Hungry but no food in inventory");
                        st.hungry_without_food = true;
                    }
                    return Ok(TickOutcome::Continue);
                };

                eating.store(true, Ordering::SeqCst);
                let handle = handle.clone();
                let state = Arc::clone(&state);
                let eating = Arc::clone(&eating);
                let core_ref = Arc::clone(&core);
                let agent_id = agent_id.clone();
                core.spawn_op(&act, async move {
                    let result = match handle.equip(&item).await {
                        Ok(()) => handle.consume().await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(()) => {
                            let mut st = lock(&state);
                            st.meals += 1;
                            st.last_food = Some(item.clone());
                            core_ref.set_last_result(format!("ate {}", item));
                        }
                        Err(e) => {
                            tracing::warn!(agent = %agent_id, food = %item, error = %e, "Failed to eat");
                            core_ref.set_last_result(format!("error: {}", e));
                        }
                    }
                    eating.store(false, Ordering::SeqCst);
                });
                Ok(TickOutcome::Continue)
            },
        );
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let ack = self.core.stop_ack();
        self.eating.store(false, Ordering::SeqCst);
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        self.core.snapshot(json!({
            "meals": st.meals,
            "lastFood": st.last_food,
            "eating": self.eating.load(Ordering::SeqCst),
            "hungryWithoutFood": st.hungry_without_food,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::testing::context;
    use crate::session::{Item, MockAction, MockWorld};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_eats_preferred_food_when_hungry() {
        let world = MockWorld::new();
        world.give(Item::new("apple", 3));
        world.give(Item::new("bread", 2));
        world.set_food(10.0);
        let (ctx, _rx) = context(&world);
        let auto_eat = AutoEatBehavior::new(ctx);
        auto_eat.start(&Value::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(world.actions().contains(&MockAction::Equip("bread".into())));
        assert_eq!(world.count_actions(|a| *a == MockAction::Consume), 1);
        assert_eq!(auto_eat.status().detail["lastFood"], "bread");
        auto_eat.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_food_does_not_stop() {
        let world = MockWorld::new();
        world.set_health(5.0);
        let (ctx, _rx) = context(&world);
        let auto_eat = AutoEatBehavior::new(ctx);
        auto_eat.start(&Value::Null).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(auto_eat.is_active());
        assert_eq!(auto_eat.status().detail["hungryWithoutFood"], true);
        assert_eq!(world.count_actions(|a| *a == MockAction::Consume), 0);
        auto_eat.stop();
    }
}

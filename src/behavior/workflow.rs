//! 工作流：按顺序驱动其他行为的步骤状态机（默认 mining → patrol → rest）
//!
//! 每一步启动对应行为并设定截止时间；到期或收到该行为的完成信号（自动停止）时停止它，
//! 进入下一步（循环）。对 BehaviorManager 来说它也是一个普通行为。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::options::Options;
use super::runner::{Activation, BehaviorCore};
use super::{Ack, Behavior, BehaviorContext, BehaviorKind, BehaviorStatus};
use crate::core::{KeeperError, Result};

/// 工作流可驱动的行为表
pub type StepRegistry = HashMap<BehaviorKind, Arc<dyn Behavior>>;

#[derive(Debug, Clone)]
struct Step {
    name: String,
    kind: BehaviorKind,
    duration: Duration,
    options: Value,
}

#[derive(Debug, Default)]
struct WorkflowState {
    steps: Vec<String>,
    kinds: Vec<BehaviorKind>,
    current: Option<usize>,
    step_started: Option<Instant>,
    step_duration: Option<Duration>,
    advances: u64,
    last_transition: Option<String>,
}

pub struct WorkflowSequencer {
    core: Arc<BehaviorCore>,
    registry: Arc<StepRegistry>,
    state: Arc<Mutex<WorkflowState>>,
    done_tx: Mutex<Option<mpsc::UnboundedSender<BehaviorKind>>>,
}

fn lock(state: &Mutex<WorkflowState>) -> MutexGuard<'_, WorkflowState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn wait_done(rx: &mut mpsc::UnboundedReceiver<BehaviorKind>, kind: BehaviorKind) {
    loop {
        match rx.recv().await {
            Some(k) if k == kind => return,
            Some(_) => continue,
            None => std::future::pending::<()>().await,
        }
    }
}

async fn run(
    core: Arc<BehaviorCore>,
    registry: Arc<StepRegistry>,
    state: Arc<Mutex<WorkflowState>>,
    act: Activation,
    steps: Vec<Step>,
    mut done_rx: mpsc::UnboundedReceiver<BehaviorKind>,
) {
    let agent_id = core.ctx().agent_id.clone();
    let mut index = 0;
    loop {
        let step = &steps[index];
        let Some(behavior) = registry.get(&step.kind) else {
            return;
        };
        while done_rx.try_recv().is_ok() {}

        if !behavior.is_active() {
            if let Err(e) = behavior.start(&step.options) {
                tracing::warn!(agent = %agent_id, step = %step.name, error = %e, "Workflow step failed to start");
                core.set_last_result(format!("{} failed to start: {}", step.name, e));
            }
        }
        {
            let mut st = lock(&state);
            st.current = Some(index);
            st.step_started = Some(Instant::now());
            st.step_duration = Some(step.duration);
        }
        tracing::info!(
            agent = %agent_id,
            step = %step.name,
            seconds = step.duration.as_secs_f64(),
            "Workflow step started"
        );

        let reason = tokio::select! {
            biased;
            _ = act.token.cancelled() => return,
            _ = wait_done(&mut done_rx, step.kind) => "done",
            _ = tokio::time::sleep(step.duration) => "deadline",
        };
        if act.is_cancelled() {
            return;
        }
        behavior.stop();

        let next = (index + 1) % steps.len();
        let transition = format!("{} -> {} ({})", step.name, steps[next].name, reason);
        tracing::info!(agent = %agent_id, transition = %transition, "Workflow step advanced");
        {
            let mut st = lock(&state);
            st.advances += 1;
            st.last_transition = Some(transition.clone());
        }
        core.set_last_result(transition);
        index = next;
    }
}

impl WorkflowSequencer {
    /// registry 为工作流可驱动的行为（不含工作流自身）
    pub fn new(ctx: BehaviorContext, registry: StepRegistry) -> Self {
        Self {
            core: BehaviorCore::new(BehaviorKind::Workflow, ctx),
            registry: Arc::new(registry),
            state: Arc::new(Mutex::new(WorkflowState::default())),
            done_tx: Mutex::new(None),
        }
    }

    /// 被驱动行为自动停止时由 BehaviorManager 转发
    pub fn notify_done(&self, kind: BehaviorKind) {
        let tx = self
            .done_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(kind);
        }
    }

    fn plan(&self, options: &Value) -> Result<Vec<Step>> {
        let cfg = &self.core.ctx().config.workflow;
        let opts = Options::parse(options)?;
        let names = opts.strings("steps", &cfg.steps)?;
        if names.is_empty() {
            return Err(KeeperError::InvalidOptions("'steps' must not be empty".to_string()));
        }
        let mining = opts.seconds("miningMaxSeconds", cfg.mining_max_secs)?;
        let patrol = opts.seconds("patrolMaxSeconds", cfg.patrol_max_secs)?;
        let rest = opts.seconds("restSeconds", cfg.rest_secs)?;
        let default = opts.seconds("defaultStepSeconds", cfg.rest_secs)?;
        let step_options = opts.object("stepOptions");

        names
            .into_iter()
            .map(|name| {
                let kind: BehaviorKind = name.parse()?;
                if kind == BehaviorKind::Workflow || !self.registry.contains_key(&kind) {
                    return Err(KeeperError::InvalidOptions(format!(
                        "'{}' cannot be a workflow step",
                        name
                    )));
                }
                let duration = match kind {
                    BehaviorKind::Mining => mining,
                    BehaviorKind::Patrol => patrol,
                    _ if name == "rest" || kind == BehaviorKind::SafeIdle => rest,
                    _ => default,
                };
                if duration.is_zero() {
                    return Err(KeeperError::InvalidOptions(format!(
                        "step '{}' needs a positive duration",
                        name
                    )));
                }
                let options = step_options.get(&name).cloned().unwrap_or(Value::Null);
                Ok(Step {
                    name,
                    kind,
                    duration,
                    options,
                })
            })
            .collect()
    }
}

impl Behavior for WorkflowSequencer {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Workflow
    }

    fn start(&self, options: &Value) -> Result<Ack> {
        let steps = self.plan(options)?;
        let activation = self.core.activate()?;
        {
            let mut st = lock(&self.state);
            *st = WorkflowState {
                steps: steps.iter().map(|s| s.name.clone()).collect(),
                kinds: steps.iter().map(|s| s.kind).collect(),
                ..WorkflowState::default()
            };
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.done_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let core = Arc::clone(&self.core);
        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.state);
        self.core.spawn_loop(&activation, move |act| {
            run(core, registry, state, act, steps, rx)
        });
        Ok(self.core.start_ack())
    }

    fn stop(&self) -> Ack {
        let was_active = self.core.is_active();
        let ack = self.core.stop_ack();
        *self.done_tx.lock().unwrap_or_else(PoisonError::into_inner) = None;
        if was_active {
            let kinds = {
                let mut st = lock(&self.state);
                st.current = None;
                st.step_started = None;
                st.kinds.clone()
            };
            for kind in kinds {
                if let Some(behavior) = self.registry.get(&kind) {
                    behavior.stop();
                }
            }
        }
        ack
    }

    fn status(&self) -> BehaviorStatus {
        let st = lock(&self.state);
        let current = st.current.and_then(|i| st.steps.get(i).cloned());
        let remaining = match (st.step_started, st.step_duration) {
            (Some(started), Some(duration)) => {
                Some(duration.saturating_sub(started.elapsed()).as_secs_f64())
            }
            _ => None,
        };
        self.core.snapshot(json!({
            "steps": st.steps,
            "currentStep": current,
            "currentIndex": st.current,
            "advances": st.advances,
            "remainingSeconds": remaining,
            "lastTransition": st.last_transition,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::idle::IdleBehavior;
    use crate::behavior::mining::MiningBehavior;
    use crate::behavior::patrol::PatrolBehavior;
    use crate::behavior::testing::context;
    use crate::session::MockWorld;

    fn sequencer(world: &MockWorld) -> (WorkflowSequencer, StepRegistry) {
        let (ctx, _rx) = context(world);
        let mut registry: StepRegistry = HashMap::new();
        registry.insert(BehaviorKind::Mining, Arc::new(MiningBehavior::new(ctx.clone())));
        registry.insert(BehaviorKind::Patrol, Arc::new(PatrolBehavior::new(ctx.clone())));
        registry.insert(BehaviorKind::SafeIdle, Arc::new(IdleBehavior::safe_idle(ctx.clone())));
        (WorkflowSequencer::new(ctx, registry.clone()), registry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_advances_exactly_once() {
        let world = MockWorld::new();
        let (workflow, registry) = sequencer(&world);
        workflow
            .start(&json!({"steps": ["mining", "patrol", "rest"], "miningMaxSeconds": 1}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry[&BehaviorKind::Mining].is_active());

        tokio::time::sleep(Duration::from_millis(1400)).await;
        let status = workflow.status();
        assert_eq!(status.detail["advances"], 1);
        assert_eq!(status.detail["currentStep"], "patrol");
        assert!(!registry[&BehaviorKind::Mining].is_active());
        assert!(registry[&BehaviorKind::Patrol].is_active());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(workflow.status().detail["advances"], 1);

        workflow.stop();
        assert!(!registry[&BehaviorKind::Patrol].is_active());
        assert!(!workflow.status().active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_signal_advances_and_wraps() {
        let world = MockWorld::new();
        let (workflow, registry) = sequencer(&world);
        workflow
            .start(&json!({"steps": ["patrol", "rest"], "patrolMaxSeconds": 100, "restSeconds": 100}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        workflow.notify_done(BehaviorKind::Patrol);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(workflow.status().detail["currentStep"], "rest");
        assert!(registry[&BehaviorKind::SafeIdle].is_active());

        // 不相关的完成信号被忽略
        workflow.notify_done(BehaviorKind::Mining);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(workflow.status().detail["currentStep"], "rest");

        workflow.notify_done(BehaviorKind::SafeIdle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(workflow.status().detail["currentStep"], "patrol");
        assert_eq!(workflow.status().detail["advances"], 2);
        workflow.stop();
    }

    #[tokio::test]
    async fn test_rejects_unknown_or_recursive_steps() {
        let world = MockWorld::new();
        let (workflow, _registry) = sequencer(&world);
        assert!(workflow.start(&json!({"steps": ["workflow"]})).is_err());
        assert!(workflow.start(&json!({"steps": ["dance"]})).is_err());
        assert!(workflow.start(&json!({"steps": []})).is_err());
        assert!(!workflow.status().active);
    }
}

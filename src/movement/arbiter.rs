//! MovementArbiter：移动能力的唯一持有者
//!
//! 各行为通过 `request(kind, intent, priority)` 提交移动请求，仲裁器保留所有未撤回的请求，
//! 只把优先级最高者（同级时最早提交者）下发到 AgentHandle。撤回当前生效请求时直接切换到
//! 下一个候选，中间不会下发 Idle。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::intent::{MovementIntent, MovementPriority};
use crate::behavior::BehaviorKind;
use crate::session::AgentHandle;

/// 卡住的目标在此期间不再下发
const STUCK_SUPPRESSION: Duration = Duration::from_secs(10);

/// request 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// 该请求即当前生效意图
    Granted,
    /// 有更高优先级请求在前，已排队
    Deferred,
}

#[derive(Debug, Clone)]
struct Claim {
    intent: MovementIntent,
    priority: MovementPriority,
    seq: u64,
}

#[derive(Debug, Default)]
struct ArbiterState {
    claims: HashMap<BehaviorKind, Claim>,
    next_seq: u64,
    owner: Option<BehaviorKind>,
    /// 最近一次真正下发给句柄的意图
    applied: MovementIntent,
    /// halt() 时卡住的意图及其屏蔽截止时间
    suppressed: Option<(MovementIntent, Instant)>,
}

impl ArbiterState {
    fn is_suppressed(&self, intent: &MovementIntent) -> bool {
        match &self.suppressed {
            Some((stuck, until)) => Instant::now() < *until && intent.same_target(stuck),
            None => false,
        }
    }

    fn winner(&self) -> Option<(BehaviorKind, &Claim)> {
        self.claims
            .iter()
            .filter(|(_, claim)| !self.is_suppressed(&claim.intent))
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|(kind, claim)| (*kind, claim))
    }
}

pub struct MovementArbiter {
    handle: AgentHandle,
    state: Mutex<ArbiterState>,
    live_tx: watch::Sender<MovementIntent>,
}

impl MovementArbiter {
    pub fn new(handle: AgentHandle) -> Self {
        let (live_tx, _) = watch::channel(MovementIntent::Idle);
        Self {
            handle,
            state: Mutex::new(ArbiterState::default()),
            live_tx,
        }
    }

    fn state(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 提交或更新某行为的移动请求
    ///
    /// 同一行为重复提交只更新意图与优先级，保留原有排队顺序；目标在容差内不会重新寻路。
    pub fn request(
        &self,
        kind: BehaviorKind,
        intent: MovementIntent,
        priority: MovementPriority,
    ) -> RequestOutcome {
        let mut state = self.state();
        let seq = match state.claims.get(&kind) {
            Some(existing) => existing.seq,
            None => {
                state.next_seq += 1;
                state.next_seq
            }
        };
        state.claims.insert(
            kind,
            Claim {
                intent,
                priority,
                seq,
            },
        );
        self.apply(&mut state);
        if state.owner == Some(kind) {
            RequestOutcome::Granted
        } else {
            RequestOutcome::Deferred
        }
    }

    /// 撤回某行为的请求；若它正在生效则回落到下一个候选或 Idle
    pub fn release(&self, kind: BehaviorKind) {
        let mut state = self.state();
        if state.claims.remove(&kind).is_none() {
            return;
        }
        if state.owner == Some(kind) {
            self.apply(&mut state);
        }
    }

    /// 撤回全部请求并停止移动（拆除 / stopAll）
    pub fn release_all(&self) {
        let mut state = self.state();
        state.claims.clear();
        self.apply(&mut state);
    }

    /// 移动卡住时强制停止：撤回当前持有者的请求，并在一段时间内不再下发同一目标
    ///
    /// 其余请求立即重新仲裁。返回被撤回请求的行为。
    pub fn halt(&self) -> Option<BehaviorKind> {
        let mut state = self.state();
        let stuck = state.owner.take();
        if let Some(kind) = stuck {
            state.claims.remove(&kind);
        }
        if !state.applied.is_idle() {
            state.suppressed = Some((state.applied.clone(), Instant::now() + STUCK_SUPPRESSION));
        }
        self.handle.stop_movement();
        state.applied = MovementIntent::Idle;
        self.publish(MovementIntent::Idle);
        tracing::debug!(owner = ?stuck, "Movement halted");
        self.apply(&mut state);
        stuck
    }

    /// 当前生效的意图
    pub fn live(&self) -> MovementIntent {
        self.live_tx.borrow().clone()
    }

    pub fn owner(&self) -> Option<BehaviorKind> {
        self.state().owner
    }

    pub fn has_claim(&self, kind: BehaviorKind) -> bool {
        self.state().claims.contains_key(&kind)
    }

    pub fn subscribe(&self) -> watch::Receiver<MovementIntent> {
        self.live_tx.subscribe()
    }

    fn apply(&self, state: &mut ArbiterState) {
        let (owner, intent) = match state.winner() {
            Some((kind, claim)) => (Some(kind), claim.intent.clone()),
            None => (None, MovementIntent::Idle),
        };
        state.owner = owner;

        if intent.same_target(&state.applied) {
            return;
        }
        match intent.goal() {
            Some(goal) => self.handle.set_goal(goal),
            None => self.handle.stop_movement(),
        }
        tracing::debug!(owner = ?owner, intent = ?intent, "Movement intent applied");
        state.applied = intent.clone();
        self.publish(intent);
    }

    fn publish(&self, intent: MovementIntent) {
        self.live_tx.send_if_modified(|current| {
            if *current == intent {
                false
            } else {
                *current = intent;
                true
            }
        });
    }
}

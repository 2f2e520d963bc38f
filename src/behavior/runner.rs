//! BehaviorCore：行为生命周期与结构化取消
//!
//! 每次 start 产生一个 Activation（代号 + CancellationToken）。stop / 自动停止会同步取消令牌、
//! abort 循环任务并撤回移动请求，之后旧循环不会再产生任何副作用。
//! 自动停止只允许当前代号触发，且每次激活最多通知一次。

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Ack, BehaviorContext, BehaviorKind, BehaviorStatus, BehaviorStopped};
use crate::core::{KeeperError, Result, StopReason};

/// 一次激活
#[derive(Debug, Clone)]
pub struct Activation {
    pub generation: u64,
    pub token: CancellationToken,
}

impl Activation {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 可取消的等待；被取消时返回 false
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// 单个 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    AutoStop(StopReason),
    /// 一次性目标已完成：静默结束，不通知也不改模式开关
    Finished,
}

#[derive(Default)]
struct CoreState {
    active: bool,
    generation: u64,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    last_result: Option<String>,
    stop_reason: Option<StopReason>,
    started_at: Option<String>,
}

pub struct BehaviorCore {
    kind: BehaviorKind,
    ctx: BehaviorContext,
    state: Mutex<CoreState>,
}

impl BehaviorCore {
    pub fn new(kind: BehaviorKind, ctx: BehaviorContext) -> Arc<Self> {
        Arc::new(Self {
            kind,
            ctx,
            state: Mutex::new(CoreState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> BehaviorKind {
        self.kind
    }

    pub fn ctx(&self) -> &BehaviorContext {
        &self.ctx
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// inactive → active；已激活时返回 AlreadyActive
    pub fn activate(&self) -> Result<Activation> {
        let mut state = self.state();
        if state.active {
            return Err(KeeperError::AlreadyActive(self.kind));
        }
        state.active = true;
        state.generation += 1;
        let token = CancellationToken::new();
        state.token = Some(token.clone());
        state.stop_reason = None;
        state.last_result = Some("started".to_string());
        state.started_at = Some(chrono::Utc::now().to_rfc3339());
        tracing::info!(agent = %self.ctx.agent_id, behavior = %self.kind, "Behavior started");
        Ok(Activation {
            generation: state.generation,
            token,
        })
    }

    /// 记录循环任务；若该激活已结束则立即 abort
    pub fn attach(&self, activation: &Activation, task: JoinHandle<()>) {
        let mut state = self.state();
        if state.active && state.generation == activation.generation {
            state.task = Some(task);
        } else {
            task.abort();
        }
    }

    /// active → inactive；返回此前是否处于激活状态
    pub fn deactivate(&self) -> bool {
        if !self.shutdown(None) {
            return false;
        }
        tracing::info!(agent = %self.ctx.agent_id, behavior = %self.kind, "Behavior stopped");
        true
    }

    /// 由行为自身循环在安全条件触发时调用；同一激活只生效一次
    pub fn auto_stop(&self, activation: &Activation, reason: StopReason) -> bool {
        {
            let state = self.state();
            if !state.active || state.generation != activation.generation {
                return false;
            }
        }
        if !self.shutdown(Some(reason)) {
            return false;
        }
        tracing::warn!(
            agent = %self.ctx.agent_id,
            behavior = %self.kind,
            reason = %reason,
            "Behavior auto-stopped"
        );
        let _ = self.ctx.notifier.send(BehaviorStopped {
            kind: self.kind,
            reason,
        });
        true
    }

    /// 当前激活正常完成；与 auto_stop 一样只对当前代号生效
    pub fn finish(&self, activation: &Activation) -> bool {
        {
            let state = self.state();
            if !state.active || state.generation != activation.generation {
                return false;
            }
        }
        if !self.shutdown(None) {
            return false;
        }
        self.set_last_result("finished");
        tracing::info!(agent = %self.ctx.agent_id, behavior = %self.kind, "Behavior finished");
        true
    }

    fn shutdown(&self, reason: Option<StopReason>) -> bool {
        let task = {
            let mut state = self.state();
            if !state.active {
                return false;
            }
            state.active = false;
            if let Some(token) = state.token.take() {
                token.cancel();
            }
            state.stop_reason = reason;
            state.last_result = Some(match reason {
                Some(r) => format!("auto-stopped: {}", r),
                None => "stopped".to_string(),
            });
            state.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.ctx.arbiter.release(self.kind);
        true
    }

    pub fn set_last_result(&self, result: impl Into<String>) {
        self.state().last_result = Some(result.into());
    }

    pub fn stop_ack(&self) -> Ack {
        if self.deactivate() {
            Ack::new(self.kind, false, format!("{} stopped", self.kind))
        } else {
            Ack::new(self.kind, false, format!("{} was not active", self.kind))
        }
    }

    pub fn start_ack(&self) -> Ack {
        Ack::new(self.kind, true, format!("{} started", self.kind))
    }

    pub fn snapshot(&self, detail: Value) -> BehaviorStatus {
        let state = self.state();
        BehaviorStatus {
            name: self.kind,
            active: state.active,
            last_result: state.last_result.clone(),
            stop_reason: state.stop_reason,
            started_at: state.started_at.clone(),
            detail,
        }
    }

    /// 定时驱动的循环：立即执行第一个 tick，之后按 next_delay 的返回值等待
    ///
    /// tick 内部不 await；返回 Err 时记录警告并继续下一个 tick。
    pub fn spawn_ticker<D, T>(self: &Arc<Self>, activation: &Activation, mut next_delay: D, mut tick: T)
    where
        D: FnMut() -> Duration + Send + 'static,
        T: FnMut() -> Result<TickOutcome> + Send + 'static,
    {
        let core = Arc::clone(self);
        let act = activation.clone();
        let task = tokio::spawn(async move {
            loop {
                if act.is_cancelled() {
                    break;
                }
                match tick() {
                    Ok(TickOutcome::Continue) => {}
                    Ok(TickOutcome::AutoStop(reason)) => {
                        core.auto_stop(&act, reason);
                        break;
                    }
                    Ok(TickOutcome::Finished) => {
                        core.finish(&act);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            agent = %core.ctx.agent_id,
                            behavior = %core.kind,
                            error = %e,
                            "Behavior tick failed"
                        );
                        core.set_last_result(format!("error: {}", e));
                    }
                }
                if !act.pause(next_delay()).await {
                    break;
                }
            }
        });
        self.attach(activation, task);
    }

    /// 顺序异步循环（挖矿、钓鱼）：body 自行在每个挂起点检查取消
    pub fn spawn_loop<F, Fut>(self: &Arc<Self>, activation: &Activation, body: F)
    where
        F: FnOnce(Activation) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let act = activation.clone();
        let fut = body(act.clone());
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = act.token.cancelled() => {}
                _ = fut => {}
            }
        });
        self.attach(activation, task);
    }

    /// tick 中发起的一次性异步操作（如进食），随激活一起取消
    pub fn spawn_op<Fut>(&self, activation: &Activation, op: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = activation.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = op => {}
            }
        });
    }
}

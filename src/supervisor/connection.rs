//! ConnectionSupervisor：单个代理会话的完整生命周期
//!
//! 状态机：Disconnected → Connecting → Connected →（卡死 / 被踢 / 出错 / 结束）→ Disconnected → 重连。
//! 除显式 remove() 外永不进入终态；连接超时、协议错误、被踢都会重试，只有缺少 host 这类配置错误
//! 才作为硬错误返回给 connect() 的调用方。
//!
//! 每个在线会话持有一个 BehaviorManager，会话结束时先停止全部行为再丢弃 AgentHandle；
//! 重连成功后按持久化的模式开关恢复行为。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::commands::{self, ChatCommand};
use super::modes::{ModeBook, ModeStore};
use crate::behavior::actions::ActionOutcome;
use crate::behavior::manager::StopAllAck;
use crate::behavior::{Ack, BehaviorManager, BehaviorStatus};
use crate::config::{AgentEntry, BehaviorsSection, SupervisorSection};
use crate::core::{
    AgentStatus, ConnectionState, KeeperError, ReconnectPolicy, RecoveryAction, RecoveryPlanner,
    RestartTimerStatus, Result,
};
use crate::observability::{AgentLog, EventBus, KeeperEvent, LogEntry};
use crate::session::{
    AgentHandle, ConnectOptions, Connector, Session, SessionClient, SessionEvent,
};

/// 所有监管者共享的依赖
#[derive(Clone)]
pub struct SupervisorContext {
    pub connector: Arc<dyn Connector>,
    pub config: SupervisorSection,
    pub behaviors: Arc<BehaviorsSection>,
    pub store: Arc<dyn ModeStore>,
    pub bus: EventBus,
}

/// 未配置用户名时生成 `Bot_xxxxxx`
pub fn generate_username() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("Bot_{}", suffix)
}

#[derive(Clone)]
struct LiveSession {
    generation: u64,
    handle: AgentHandle,
    manager: Arc<BehaviorManager>,
    /// 取消该会话的事件泵、看门狗与恢复任务
    token: CancellationToken,
}

#[derive(Default)]
struct RestartTimer {
    minutes: u64,
    next: Option<chrono::DateTime<chrono::Utc>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    state: ConnectionState,
    live: Option<LiveSession>,
    generation: u64,
    /// 显式 disconnect() 后为 false，阻止自动重连
    auto_reconnect: bool,
    last_activity: Option<Instant>,
    last_behaviors: Vec<BehaviorStatus>,
    reconnect_attempts: u32,
    restart: RestartTimer,
    /// 尚未执行的模式恢复；死亡时取消
    pending_restore: Option<CancellationToken>,
}

pub struct ConnectionSupervisor {
    id: String,
    entry: AgentEntry,
    username: String,
    ctx: SupervisorContext,
    planner: RecoveryPlanner,
    modes: Arc<ModeBook>,
    log: Arc<AgentLog>,
    inner: Mutex<Inner>,
    reconnecting: AtomicBool,
    removed: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(entry: AgentEntry, ctx: SupervisorContext) -> Arc<Self> {
        let id = if entry.id.trim().is_empty() {
            uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
        } else {
            entry.id.clone()
        };
        let username = entry
            .username
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(generate_username);
        let supervisor = Arc::new(Self {
            modes: Arc::new(ModeBook::new(&id, Arc::clone(&ctx.store), ctx.bus.clone())),
            log: Arc::new(AgentLog::new(&id, ctx.bus.clone())),
            planner: RecoveryPlanner::new(ReconnectPolicy::from_config(&ctx.config)),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                live: None,
                generation: 0,
                auto_reconnect: true,
                last_activity: None,
                last_behaviors: Vec::new(),
                reconnect_attempts: 0,
                restart: RestartTimer::default(),
                pending_restore: None,
            }),
            reconnecting: AtomicBool::new(false),
            removed: CancellationToken::new(),
            id,
            entry,
            username,
            ctx,
        });
        if supervisor.entry.restart_minutes > 0 {
            supervisor.set_restart_timer(supervisor.entry.restart_minutes);
        }
        supervisor
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.entry.host, self.entry.port)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner().state
    }

    pub fn is_connected(&self) -> bool {
        self.inner().live.is_some()
    }

    pub fn modes(&self) -> &Arc<ModeBook> {
        &self.modes
    }

    /// 当前会话的行为管理器；未连接时为 None
    pub fn manager(&self) -> Option<Arc<BehaviorManager>> {
        self.inner().live.as_ref().map(|l| Arc::clone(&l.manager))
    }

    pub fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.log.recent(limit)
    }

    /// 建立会话并等待 spawn
    ///
    /// 已连接时返回 AlreadyConnected；缺少 host 返回 ConfigurationInvalid（不重试）；
    /// 其余失败返回 ConnectionFailed，同时在后台安排重连。
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if !self.removed.is_cancelled() {
            self.inner().auto_reconnect = true;
        }
        let result = self.try_connect().await;
        if let Err(KeeperError::ConnectionFailed(_)) = &result {
            self.schedule_reconnect();
        }
        result
    }

    async fn try_connect(self: &Arc<Self>) -> Result<()> {
        if self.removed.is_cancelled() {
            return Err(KeeperError::Removed);
        }
        if self.entry.host.trim().is_empty() || self.entry.port == 0 {
            let err = KeeperError::ConfigurationInvalid("missing host or port".to_string());
            self.log.error(err.to_string());
            return Err(err);
        }
        {
            let mut inner = self.inner();
            if inner.live.is_some() || inner.state == ConnectionState::Connecting {
                return Err(KeeperError::AlreadyConnected);
            }
            inner.state = ConnectionState::Connecting;
        }
        self.log.info(format!(
            "Connecting to {} as {}",
            self.server_address(),
            self.username
        ));
        self.emit_status();

        let options = ConnectOptions {
            host: self.entry.host.clone(),
            port: self.entry.port,
            username: self.username.clone(),
            version: self.entry.version.clone(),
        };
        let (client, events) = match self.establish(&options).await {
            Ok(session) => session,
            Err(reason) => {
                self.set_state(ConnectionState::Disconnected);
                self.log.error(format!("Connection failed: {}", reason));
                self.emit_status();
                return Err(KeeperError::ConnectionFailed(reason));
            }
        };
        if self.removed.is_cancelled() {
            client.quit();
            return Err(KeeperError::Removed);
        }
        // 握手期间被操作员断开
        if !self.inner().auto_reconnect {
            client.quit();
            self.set_state(ConnectionState::Disconnected);
            self.emit_status();
            return Err(KeeperError::NotConnected);
        }
        self.install(client, events);
        Ok(())
    }

    /// 连接并等待 spawn，两者共用 connect_timeout；失败时退出半建立的会话
    async fn establish(
        &self,
        options: &ConnectOptions,
    ) -> std::result::Result<(Arc<dyn SessionClient>, mpsc::UnboundedReceiver<SessionEvent>), String>
    {
        let secs = self.ctx.config.connect_timeout_secs;
        let deadline = Instant::now() + Duration::from_secs(secs);
        let Session { client, mut events } =
            match tokio::time::timeout_at(deadline, self.ctx.connector.connect(options)).await {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => return Err(e.to_string()),
                Err(_) => return Err(format!("connect timed out after {}s", secs)),
            };

        let spawned = tokio::time::timeout_at(deadline, async {
            loop {
                match events.recv().await {
                    Some(SessionEvent::Spawn) => return Ok(()),
                    Some(event) if event.is_terminal() => {
                        return Err(format!("{:?} before spawn", event))
                    }
                    Some(_) => continue,
                    None => return Err("session closed before spawn".to_string()),
                }
            }
        })
        .await;
        match spawned {
            Ok(Ok(())) => Ok((client, events)),
            Ok(Err(reason)) => {
                client.quit();
                Err(reason)
            }
            Err(_) => {
                client.quit();
                Err(format!("no spawn within {}s", secs))
            }
        }
    }

    fn install(
        self: &Arc<Self>,
        client: Arc<dyn SessionClient>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let handle = AgentHandle::new(client);
        let manager = BehaviorManager::new(
            self.id.clone(),
            handle.clone(),
            Arc::clone(&self.ctx.behaviors),
            Arc::clone(&self.modes),
            Arc::clone(&self.log),
            self.ctx.bus.clone(),
        );
        let token = self.removed.child_token();
        let generation = {
            let mut inner = self.inner();
            inner.generation += 1;
            inner.live = Some(LiveSession {
                generation: inner.generation,
                handle,
                manager: Arc::clone(&manager),
                token: token.clone(),
            });
            inner.state = ConnectionState::Connected;
            inner.last_activity = Some(Instant::now());
            inner.reconnect_attempts = 0;
            inner.generation
        };
        self.log.success(format!(
            "Connected to {} as {}",
            self.server_address(),
            self.username
        ));
        self.emit_status();

        tokio::spawn(Arc::clone(self).pump(generation, events, token.clone()));
        tokio::spawn(Arc::clone(self).watchdog(generation, token.clone()));
        self.spawn_restore(generation, manager, &token);
    }

    /// 安排一次延迟恢复，替换之前尚未执行的那次
    fn spawn_restore(
        self: &Arc<Self>,
        generation: u64,
        manager: Arc<BehaviorManager>,
        session: &CancellationToken,
    ) {
        let token = session.child_token();
        if let Some(previous) = self.inner().pending_restore.replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(Arc::clone(self).restore(generation, manager, token));
    }

    fn cancel_pending_restore(&self) {
        if let Some(pending) = self.inner().pending_restore.take() {
            pending.cancel();
        }
    }

    fn live_session(&self, generation: u64) -> Option<LiveSession> {
        self.inner()
            .live
            .as_ref()
            .filter(|l| l.generation == generation)
            .cloned()
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner().state = state;
    }

    fn touch(&self) {
        self.inner().last_activity = Some(Instant::now());
    }

    /// spawn / 复活后按持久化开关恢复行为
    async fn restore(
        self: Arc<Self>,
        generation: u64,
        manager: Arc<BehaviorManager>,
        token: CancellationToken,
    ) {
        let delay = Duration::from_millis(self.ctx.config.restore_delay_ms);
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        let modes = self.modes.load().await;
        if token.is_cancelled() || self.live_session(generation).is_none() {
            return;
        }
        let restored = manager.restore_modes(&modes).await;
        // 恢复期间会话被拆除或代理死亡：不能留下孤儿定时器
        if token.is_cancelled() || self.live_session(generation).is_none() {
            manager.stop_all();
            return;
        }
        if restored > 0 {
            self.log.info(format!("Restored {} behaviors", restored));
            self.emit_status();
        }
    }

    async fn pump(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Some(event) => {
                    if !self.on_event(generation, event).await {
                        return;
                    }
                }
                None => {
                    self.session_lost(generation, "session stream closed".to_string());
                    return;
                }
            }
        }
    }

    /// 处理一个入站事件；返回 false 表示该会话已结束
    async fn on_event(self: &Arc<Self>, generation: u64, event: SessionEvent) -> bool {
        let Some(live) = self.live_session(generation) else {
            return false;
        };
        self.touch();
        match event {
            SessionEvent::Spawn | SessionEvent::Move(_) | SessionEvent::Health { .. } => {}
            SessionEvent::Death => {
                self.log.warn("Died, respawning");
                self.cancel_pending_restore();
                live.manager.stop_all();
                let delay = Duration::from_millis(self.ctx.config.respawn_delay_ms);
                let handle = live.handle.clone();
                let token = live.token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => handle.respawn(),
                    }
                });
                self.emit_status();
            }
            SessionEvent::Respawn => {
                if let Some(position) = live.handle.position() {
                    live.manager.patrol().reset_center(position);
                }
                self.log.info("Respawned");
                self.spawn_restore(generation, Arc::clone(&live.manager), &live.token);
                self.emit_status();
            }
            SessionEvent::Chat { username, message } => {
                if username != self.username {
                    if let Some(command) = ChatCommand::parse(&message) {
                        let reply =
                            commands::execute(self, &live.manager, &username, command).await;
                        live.manager.chat().send(&reply);
                    }
                }
            }
            SessionEvent::PlayerJoined(name) => self.log.info(format!("{} joined", name)),
            SessionEvent::PlayerLeft(name) => self.log.info(format!("{} left", name)),
            SessionEvent::Kicked(reason) => {
                self.session_lost(generation, format!("kicked: {}", reason));
                return false;
            }
            SessionEvent::Error(error) => {
                self.session_lost(generation, format!("error: {}", error));
                return false;
            }
            SessionEvent::End => {
                self.session_lost(generation, "connection ended".to_string());
                return false;
            }
        }
        true
    }

    /// 看门狗：超过 stale_after 无入站事件即拆除并重连
    async fn watchdog(self: Arc<Self>, generation: u64, token: CancellationToken) {
        let interval = Duration::from_secs(self.ctx.config.watchdog_interval_secs.max(1));
        let stale_after = Duration::from_secs(self.ctx.config.stale_after_secs);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            let idle = self.inner().last_activity.map(|t| t.elapsed());
            if let Some(idle) = idle {
                if idle >= stale_after {
                    self.session_lost(
                        generation,
                        format!("no activity for {}s", idle.as_secs()),
                    );
                    return;
                }
            }
        }
    }

    /// 会话失效（被踢、出错、结束、卡死）：拆除后进入重连
    fn session_lost(self: &Arc<Self>, generation: u64, reason: String) {
        let live = {
            let mut inner = self.inner();
            let current = inner.live.as_ref().map(|l| l.generation) == Some(generation);
            if current {
                inner.live.take()
            } else {
                None
            }
        };
        let Some(live) = live else {
            return;
        };
        self.log.warn(format!("Disconnected: {}", reason));
        self.teardown(live);
        self.set_state(ConnectionState::Disconnected);
        self.emit_status();
        self.schedule_reconnect();
    }

    /// 先停止全部行为，再退出并作废句柄
    fn teardown(&self, live: LiveSession) {
        live.manager.teardown();
        let behaviors = live.manager.get_status();
        live.token.cancel();
        live.handle.quit();
        live.handle.invalidate();
        self.inner().last_behaviors = behaviors;
    }

    fn take_live(&self) -> Option<LiveSession> {
        self.inner().live.take()
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.removed.is_cancelled() || !self.inner().auto_reconnect {
            return;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(Arc::clone(self).reconnect_loop());
    }

    fn needs_reconnect(&self) -> bool {
        let inner = self.inner();
        !self.removed.is_cancelled()
            && inner.auto_reconnect
            && inner.live.is_none()
            && inner.state == ConnectionState::Disconnected
    }

    /// 固定延迟重试，默认不设上限，直到连上、被显式断开或被移除
    async fn reconnect_loop(self: Arc<Self>) {
        let mut last_error = KeeperError::ConnectionFailed("session lost".to_string());
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let delay = match self.planner.handle(&last_error, attempt) {
                RecoveryAction::Reconnect(delay) => delay,
                RecoveryAction::GiveUp(reason) => {
                    self.log.error(format!("Giving up reconnecting: {}", reason));
                    break;
                }
                RecoveryAction::Report(reason) => {
                    self.log.warn(format!("Reconnect stopped: {}", reason));
                    break;
                }
            };
            self.inner().reconnect_attempts = attempt;
            self.log.info(format!(
                "Reconnecting in {}ms (attempt {})",
                delay.as_millis(),
                attempt
            ));
            self.emit_status();

            tokio::select! {
                biased;
                _ = self.removed.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if !self.needs_reconnect() {
                break;
            }
            match self.try_connect().await {
                Ok(())
                | Err(KeeperError::AlreadyConnected)
                | Err(KeeperError::Removed)
                | Err(KeeperError::NotConnected) => break,
                Err(e) => last_error = e,
            }
        }
        self.reconnecting.store(false, Ordering::SeqCst);
        if self.needs_reconnect() {
            self.schedule_reconnect();
        }
    }

    /// 拆除当前会话但保留模式开关，随后自动重连（卡死 / 手动刷新）
    pub fn soft_disconnect(self: &Arc<Self>) -> Result<()> {
        let live = self.take_live().ok_or(KeeperError::NotConnected)?;
        self.log.info("Soft disconnect, reconnecting");
        self.teardown(live);
        self.set_state(ConnectionState::Disconnected);
        self.emit_status();
        self.schedule_reconnect();
        Ok(())
    }

    /// 操作员断开：不再自动重连，直到下一次 connect()
    pub fn disconnect(&self) -> Result<()> {
        let live = {
            let mut inner = self.inner();
            inner.auto_reconnect = false;
            inner.live.take()
        };
        let live = live.ok_or(KeeperError::NotConnected)?;
        self.teardown(live);
        self.set_state(ConnectionState::Disconnected);
        self.log.info("Disconnected by operator");
        self.emit_status();
        Ok(())
    }

    /// 从系统中移除（终态）：停止行为、退出会话、取消重连与重启定时器
    pub fn remove(&self) {
        if self.removed.is_cancelled() {
            return;
        }
        self.removed.cancel();
        let (live, restart) = {
            let mut inner = self.inner();
            inner.auto_reconnect = false;
            inner.state = ConnectionState::Removed;
            (inner.live.take(), inner.restart.task.take())
        };
        if let Some(task) = restart {
            task.abort();
        }
        if let Some(live) = live {
            self.teardown(live);
        }
        self.log.info("Agent removed");
        self.emit_status();
    }

    pub fn is_removed(&self) -> bool {
        self.removed.is_cancelled()
    }

    /// 每隔 minutes 分钟在连接状态下发送重启命令；0 表示关闭
    pub fn set_restart_timer(self: &Arc<Self>, minutes: u64) {
        let previous = {
            let mut inner = self.inner();
            inner.restart.minutes = minutes;
            inner.restart.next = None;
            inner.restart.task.take()
        };
        if let Some(task) = previous {
            task.abort();
        }
        if minutes == 0 || self.removed.is_cancelled() {
            self.log.info("Restart timer disabled");
            return;
        }

        let period = Duration::from_secs(minutes.saturating_mul(60));
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(restart_loop(weak, period));
        {
            let mut inner = self.inner();
            inner.restart.next = Some(next_restart(period));
            inner.restart.task = Some(task);
        }
        self.log.info(format!("Restart timer set to every {} minutes", minutes));
        self.emit_status();
    }

    /// 启用 / 停用行为（需要在线会话）
    pub async fn set_behavior(&self, name: &str, enabled: bool, options: Value) -> Result<Ack> {
        let manager = self.manager().ok_or(KeeperError::NotConnected)?;
        let result = manager.set_behavior(name, enabled, options).await;
        self.emit_status();
        result
    }

    pub async fn do_action(&self, name: &str, params: Value) -> Result<ActionOutcome> {
        let manager = self.manager().ok_or(KeeperError::NotConnected)?;
        manager.do_action(name, params).await
    }

    /// 操作员「全部停止」：停止行为并清空模式开关；离线时只清空开关
    pub async fn stop_all(&self) -> StopAllAck {
        let ack = match self.manager() {
            Some(manager) => manager.stop_all_and_clear_modes().await,
            None => {
                self.modes.clear().await;
                StopAllAck {
                    stopped: Vec::new(),
                    message: "not connected, modes cleared".to_string(),
                }
            }
        };
        self.emit_status();
        ack
    }

    pub fn status(&self) -> AgentStatus {
        let (state, live, last_behaviors, attempts, idle, restart) = {
            let inner = self.inner();
            (
                inner.state,
                inner.live.clone(),
                inner.last_behaviors.clone(),
                inner.reconnect_attempts,
                inner.last_activity.map(|t| t.elapsed().as_secs_f64()),
                RestartTimerStatus {
                    enabled: inner.restart.minutes > 0,
                    interval_minutes: inner.restart.minutes,
                    next_restart: inner.restart.next.map(|t| t.to_rfc3339()),
                },
            )
        };
        let handle = live.as_ref().map(|l| &l.handle);
        AgentStatus {
            id: self.id.clone(),
            name: self.entry.display_name(),
            state,
            connected: live.is_some(),
            server_address: self.server_address(),
            username: handle
                .and_then(|h| h.username())
                .or_else(|| Some(self.username.clone())),
            version: handle
                .and_then(|h| h.version())
                .or_else(|| self.entry.version.clone()),
            health: handle.and_then(|h| h.health()),
            food: handle.and_then(|h| h.food()),
            position: handle.and_then(|h| h.position()),
            players: handle.map(|h| h.players()).unwrap_or_default(),
            modes: self.modes.snapshot().flags(),
            behaviors: match &live {
                Some(l) => l.manager.get_status(),
                None => last_behaviors,
            },
            restart_timer: restart,
            reconnect_attempts: attempts,
            last_activity_secs_ago: if live.is_some() { idle } else { None },
        }
    }

    pub(crate) fn emit_status(&self) {
        self.ctx.bus.emit(KeeperEvent::Status {
            agent_id: self.id.clone(),
            status: Box::new(self.status()),
        });
    }
}

fn next_restart(period: Duration) -> chrono::DateTime<chrono::Utc> {
    let period = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
    chrono::Utc::now() + period
}

async fn restart_loop(supervisor: Weak<ConnectionSupervisor>, period: Duration) {
    loop {
        tokio::time::sleep(period).await;
        let Some(supervisor) = supervisor.upgrade() else {
            return;
        };
        let handle = supervisor.inner().live.as_ref().map(|l| l.handle.clone());
        match handle {
            Some(handle) => {
                handle.chat(&supervisor.ctx.config.restart_command);
                supervisor.log.info(format!(
                    "Sent restart command '{}'",
                    supervisor.ctx.config.restart_command
                ));
            }
            None => {
                tracing::debug!(agent = %supervisor.id, "Restart timer fired while offline");
            }
        }
        supervisor.inner().restart.next = Some(next_restart(period));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockAction, MockConnector, MockWorld};
    use crate::supervisor::MemoryModeStore;

    fn supervisor(host: &str) -> (Arc<ConnectionSupervisor>, MockConnector) {
        let connector = MockConnector::new(MockWorld::new());
        let ctx = SupervisorContext {
            connector: Arc::new(connector.clone()),
            config: SupervisorSection::default(),
            behaviors: Arc::new(BehaviorsSection::default()),
            store: Arc::new(MemoryModeStore::new()),
            bus: EventBus::default(),
        };
        let entry = AgentEntry {
            id: "a1".into(),
            host: host.into(),
            ..AgentEntry::default()
        };
        (ConnectionSupervisor::new(entry, ctx), connector)
    }

    #[test]
    fn test_generated_username_shape() {
        let name = generate_username();
        assert!(name.starts_with("Bot_"));
        assert_eq!(name.len(), 10);
        assert!(name[4..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_uses_generated_username() {
        let (sup, connector) = supervisor("localhost");
        sup.connect().await.unwrap();
        let options = connector.last_options().unwrap();
        assert_eq!(options.username, sup.username());
        assert_eq!(options.port, 25565);
        assert_eq!(sup.status().username.as_deref(), Some(sup.username()));
        sup.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_timer_sends_command_while_connected() {
        let (sup, connector) = supervisor("localhost");
        sup.connect().await.unwrap();
        sup.set_restart_timer(1);
        assert!(sup.status().restart_timer.enabled);

        // 保持活跃，避免看门狗判定卡死
        for _ in 0..7 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            connector.world().emit(SessionEvent::Health {
                health: 20.0,
                food: 20.0,
            });
        }
        assert!(connector.world().chats().contains(&"/restart".to_string()));

        sup.set_restart_timer(0);
        assert!(!sup.status().restart_timer.enabled);
        sup.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_is_terminal() {
        let (sup, connector) = supervisor("localhost");
        sup.connect().await.unwrap();
        sup.remove();
        sup.remove();
        assert_eq!(sup.state(), ConnectionState::Removed);
        assert!(connector.world().actions().contains(&MockAction::Quit));
        assert!(matches!(sup.connect().await, Err(KeeperError::Removed)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.connect_count(), 1);
    }
}

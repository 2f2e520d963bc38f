//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM 后在限定时间内执行清理：移除所有代理（停止行为、退出会话），
//! 进程退出后不能残留定时器或重连任务。

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::supervisor::AgentPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

/// 关闭信号：第一次 shutdown() 的原因生效，之后的调用被忽略
#[derive(Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut current = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if current.is_some() {
                return;
            }
            tracing::info!(reason = ?reason, "Shutdown requested");
            *current = Some(reason);
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装 Ctrl+C 与（unix 下）SIGTERM 处理
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭时执行的清理
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 日志中的名称
    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理，每项单独限时
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanups: Vec<Arc<dyn ShutdownCleanup>>,
    per_task_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanups: Vec::new(),
            per_task_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_task_timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanups.push(Arc::new(task));
    }

    /// 返回成功完成的清理数量；失败或超时只记日志
    pub async fn run_cleanup(&self) -> usize {
        let mut completed = 0;
        for task in &self.cleanups {
            match tokio::time::timeout(self.per_task_timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    completed += 1;
                    tracing::info!(task = task.name(), "Cleanup finished");
                }
                Ok(Err(e)) => tracing::warn!(task = task.name(), error = %e, "Cleanup failed"),
                Err(_) => tracing::warn!(
                    task = task.name(),
                    timeout_secs = self.per_task_timeout.as_secs(),
                    "Cleanup timed out"
                ),
            }
        }
        completed
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 移除池中全部代理：停止所有行为、退出会话、取消重连
pub struct PoolCleanup {
    pool: Arc<AgentPool>,
}

impl PoolCleanup {
    pub fn new(pool: Arc<AgentPool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for PoolCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let removed = self.pool.remove_all().await;
        tracing::info!(agents = removed, "Agents removed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "agent_pool"
    }
}

/// 运行 app 直到其结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    manager.install_signal_handlers();

    tokio::select! {
        _ = app => tracing::info!("Keeper finished"),
        _ = manager.wait_for_shutdown() => {}
    }

    cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentEntry, AppConfig};
    use crate::core::ConnectionState;
    use crate::session::{MockAction, MockConnector, MockWorld};
    use crate::supervisor::MemoryModeStore;

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());

        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::FatalError("late".into()));
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::Signal));
    }

    struct Hang;

    #[async_trait::async_trait]
    impl ShutdownCleanup for Hang {
        async fn cleanup(&self) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "hang"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_cleanup_removes_agents_despite_hung_task() {
        let connector = MockConnector::new(MockWorld::new());
        let pool = Arc::new(AgentPool::new(
            Arc::new(connector.clone()),
            &AppConfig::default(),
            Arc::new(MemoryModeStore::new()),
        ));
        let agent = pool
            .add(AgentEntry {
                id: "a1".into(),
                host: "localhost".into(),
                ..AgentEntry::default()
            })
            .await
            .unwrap();
        agent.connect().await.unwrap();

        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()))
            .with_timeout(Duration::from_secs(1));
        coordinator.register(Hang);
        coordinator.register(PoolCleanup::new(Arc::clone(&pool)));

        assert_eq!(coordinator.run_cleanup().await, 1);
        assert!(pool.is_empty().await);
        assert_eq!(agent.state(), ConnectionState::Removed);
        assert!(connector.world().actions().contains(&MockAction::Quit));
    }
}

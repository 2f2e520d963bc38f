//! Keeper - 游戏世界机器人托管
//!
//! 入口：加载配置、初始化日志、为 [[agents]] 中的每个代理建立监管并连接，直到 Ctrl+C。
//! 尚未接入真实协议客户端时使用内存模拟世界。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper::config::load_config;
use keeper::core::{
    run_with_graceful_shutdown, PoolCleanup, SessionError, ShutdownCoordinator, ShutdownManager,
};
use keeper::observability;
use keeper::session::{
    ConnectOptions, Connector, MockConnector, MockWorld, Session, SessionEvent, Vec3,
};
use keeper::supervisor::{AgentPool, JsonFileModeStore, MemoryModeStore, ModeStore};
use tokio::sync::broadcast;

/// 每次连接新建一个模拟世界，并周期性产生遥测事件（保持看门狗活跃）
struct DemoConnector;

#[async_trait]
impl Connector for DemoConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Session, SessionError> {
        let world = MockWorld::new();
        world.set_position(Vec3::new(0.0, 64.0, 0.0));
        let session = MockConnector::new(world.clone()).connect(options).await?;
        tokio::spawn(async move {
            let mut tick = 0.0;
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                tick += 1.0;
                let alive = world.emit(SessionEvent::Move(Vec3::new(tick % 4.0, 64.0, 0.0)))
                    && world.emit(SessionEvent::Health {
                        health: 20.0,
                        food: 20.0,
                    });
                if !alive {
                    break;
                }
            }
        });
        Ok(session)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        Default::default()
    });

    let store: Arc<dyn ModeStore> = match &cfg.app.modes_path {
        Some(path) => Arc::new(JsonFileModeStore::new(path)),
        None => Arc::new(MemoryModeStore::new()),
    };

    tracing::warn!("No protocol client linked, agents run against a simulated world");
    let pool = Arc::new(AgentPool::new(Arc::new(DemoConnector), &cfg, store));
    for entry in cfg.agents.clone() {
        if let Err(e) = pool.add(entry).await {
            tracing::warn!(error = %e, "Skipping agent");
        }
    }
    if pool.is_empty().await {
        tracing::info!("No agents configured, add [[agents]] to config/default.toml");
    }

    let mut events = pool.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        tracing::debug!(target: "keeper::events", "{}", json);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let manager = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
    coordinator.register(PoolCleanup::new(Arc::clone(&pool)));

    let app_pool = Arc::clone(&pool);
    run_with_graceful_shutdown(
        manager,
        async move {
            app_pool.connect_all().await;
            std::future::pending::<()>().await;
        },
        || async move {
            coordinator.run_cleanup().await;
        },
    )
    .await;

    Ok(())
}

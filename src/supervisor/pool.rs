//! AgentPool：按 id 管理多个 ConnectionSupervisor，共享连接工厂、模式存储与事件总线

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{broadcast, RwLock};

use super::connection::{ConnectionSupervisor, SupervisorContext};
use super::modes::ModeStore;
use crate::config::{AgentEntry, AppConfig};
use crate::core::{AgentStatus, KeeperError, Result};
use crate::observability::{EventBus, KeeperEvent};
use crate::session::Connector;

pub struct AgentPool {
    ctx: SupervisorContext,
    agents: RwLock<BTreeMap<String, Arc<ConnectionSupervisor>>>,
}

impl AgentPool {
    pub fn new(connector: Arc<dyn Connector>, config: &AppConfig, store: Arc<dyn ModeStore>) -> Self {
        Self {
            ctx: SupervisorContext {
                connector,
                config: config.supervisor.clone(),
                behaviors: Arc::new(config.behaviors.clone()),
                store,
                bus: EventBus::default(),
            },
            agents: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeeperEvent> {
        self.ctx.bus.subscribe()
    }

    /// 注册代理（不连接）；id 重复返回 AgentExists
    pub async fn add(&self, entry: AgentEntry) -> Result<Arc<ConnectionSupervisor>> {
        let mut agents = self.agents.write().await;
        if !entry.id.is_empty() && agents.contains_key(&entry.id) {
            return Err(KeeperError::AgentExists(entry.id));
        }
        let supervisor = ConnectionSupervisor::new(entry, self.ctx.clone());
        let id = supervisor.id().to_string();
        if agents.contains_key(&id) {
            supervisor.remove();
            return Err(KeeperError::AgentExists(id));
        }
        tracing::info!(agent = %id, address = %supervisor.server_address(), "Agent added");
        agents.insert(id, Arc::clone(&supervisor));
        Ok(supervisor)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ConnectionSupervisor>> {
        self.agents.read().await.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// 移除并终止代理
    pub async fn remove(&self, id: &str) -> Result<()> {
        let supervisor = self
            .agents
            .write()
            .await
            .remove(id)
            .ok_or_else(|| KeeperError::AgentNotFound(id.to_string()))?;
        supervisor.remove();
        Ok(())
    }

    /// 关闭时调用：移除全部代理，返回数量
    pub async fn remove_all(&self) -> usize {
        let drained: Vec<_> = std::mem::take(&mut *self.agents.write().await)
            .into_values()
            .collect();
        for supervisor in &drained {
            supervisor.remove();
        }
        drained.len()
    }

    /// 并发连接全部代理；单个失败不影响其他代理（失败者已在后台重连）
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let agents: Vec<_> = self.agents.read().await.values().cloned().collect();
        let results = join_all(agents.iter().map(|a| a.connect())).await;
        agents
            .iter()
            .zip(results)
            .map(|(agent, result)| {
                if let Err(e) = &result {
                    tracing::warn!(agent = %agent.id(), error = %e, "Initial connect failed");
                }
                (agent.id().to_string(), result)
            })
            .collect()
    }

    pub async fn status_all(&self) -> Vec<AgentStatus> {
        let agents: Vec<_> = self.agents.read().await.values().cloned().collect();
        agents.iter().map(|a| a.status()).collect()
    }
}

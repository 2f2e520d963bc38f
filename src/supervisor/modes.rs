//! 模式开关持久化：记录每个代理启用了哪些行为（及启动参数），重连后据此恢复
//!
//! JSON 文件实现为单文件，顶层按代理 id 分组；文件不存在时视为全部关闭。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::behavior::BehaviorKind;
use crate::core::Result;
use crate::observability::{EventBus, KeeperEvent};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModeEntry {
    pub enabled: bool,
    /// 最近一次启用时的 options，恢复时原样传回 start()
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
}

/// 行为 → 开关
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeSet {
    modes: BTreeMap<BehaviorKind, ModeEntry>,
}

impl ModeSet {
    /// 启用时记录 options；关闭时保留上次的 options
    pub fn set(&mut self, kind: BehaviorKind, enabled: bool, options: Option<Value>) {
        let entry = self.modes.entry(kind).or_default();
        entry.enabled = enabled;
        if let Some(options) = options {
            entry.options = options;
        }
    }

    pub fn is_enabled(&self, kind: BehaviorKind) -> bool {
        self.modes.get(&kind).map(|e| e.enabled).unwrap_or(false)
    }

    /// 需要恢复的行为，按 BehaviorKind 顺序（工作流排在最后）
    pub fn enabled(&self) -> Vec<(BehaviorKind, Value)> {
        self.modes
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(k, e)| (*k, e.options.clone()))
            .collect()
    }

    pub fn flags(&self) -> BTreeMap<BehaviorKind, bool> {
        BehaviorKind::ALL
            .iter()
            .map(|k| (*k, self.is_enabled(*k)))
            .collect()
    }

    pub fn clear(&mut self) {
        for entry in self.modes.values_mut() {
            entry.enabled = false;
        }
    }
}

/// 模式开关的外部存储
#[async_trait]
pub trait ModeStore: Send + Sync {
    async fn load_modes(&self, agent_id: &str) -> Result<ModeSet>;
    async fn save_modes(&self, agent_id: &str, modes: &ModeSet) -> Result<()>;
}

/// 单文件 JSON 存储；父目录不存在时自动创建
#[derive(Debug)]
pub struct JsonFileModeStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileModeStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, ModeSet>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) if data.trim().is_empty() => Ok(HashMap::new()),
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ModeStore for JsonFileModeStore {
    async fn load_modes(&self, agent_id: &str) -> Result<ModeSet> {
        let mut all = self.read_all().await?;
        Ok(all.remove(agent_id).unwrap_or_default())
    }

    async fn save_modes(&self, agent_id: &str, modes: &ModeSet) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(agent_id.to_string(), modes.clone());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&all)?).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryModeStore {
    modes: Mutex<HashMap<String, ModeSet>>,
}

impl MemoryModeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModeStore for MemoryModeStore {
    async fn load_modes(&self, agent_id: &str) -> Result<ModeSet> {
        let modes = self.modes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(modes.get(agent_id).cloned().unwrap_or_default())
    }

    async fn save_modes(&self, agent_id: &str, modes: &ModeSet) -> Result<()> {
        self.modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_id.to_string(), modes.clone());
        Ok(())
    }
}

/// 单个代理的模式开关：内存副本 + 写穿存储 + ModesChanged 广播
///
/// 跨越会话存在（由 ConnectionSupervisor 持有），BehaviorManager 重建时复用。
pub struct ModeBook {
    agent_id: String,
    store: Arc<dyn ModeStore>,
    modes: Mutex<ModeSet>,
    bus: EventBus,
}

impl ModeBook {
    pub fn new(agent_id: impl Into<String>, store: Arc<dyn ModeStore>, bus: EventBus) -> Self {
        Self {
            agent_id: agent_id.into(),
            store,
            modes: Mutex::new(ModeSet::default()),
            bus,
        }
    }

    fn modes(&self) -> MutexGuard<'_, ModeSet> {
        self.modes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 从存储读入；失败时保留内存副本
    pub async fn load(&self) -> ModeSet {
        match self.store.load_modes(&self.agent_id).await {
            Ok(loaded) => {
                *self.modes() = loaded.clone();
                loaded
            }
            Err(e) => {
                tracing::warn!(agent = %self.agent_id, error = %e, "Failed to load modes");
                self.snapshot()
            }
        }
    }

    pub fn snapshot(&self) -> ModeSet {
        self.modes().clone()
    }

    pub fn is_enabled(&self, kind: BehaviorKind) -> bool {
        self.modes().is_enabled(kind)
    }

    pub async fn set(&self, kind: BehaviorKind, enabled: bool, options: Option<Value>) {
        let changed = {
            let mut modes = self.modes();
            let before = modes.clone();
            modes.set(kind, enabled, options);
            if *modes == before {
                None
            } else {
                Some(modes.clone())
            }
        };
        if let Some(modes) = changed {
            self.persist(modes).await;
        }
    }

    pub async fn clear(&self) {
        let modes = {
            let mut modes = self.modes();
            modes.clear();
            modes.clone()
        };
        self.persist(modes).await;
    }

    async fn persist(&self, modes: ModeSet) {
        if let Err(e) = self.store.save_modes(&self.agent_id, &modes).await {
            tracing::warn!(agent = %self.agent_id, error = %e, "Failed to save modes");
        }
        self.bus.emit(KeeperEvent::ModesChanged {
            agent_id: self.agent_id.clone(),
            modes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_json_store_round_trips_per_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("modes.json");
        let store = JsonFileModeStore::new(&path);

        assert_eq!(store.load_modes("a1").await.unwrap(), ModeSet::default());

        let mut modes = ModeSet::default();
        modes.set(BehaviorKind::Follow, true, Some(json!({"target": "alice"})));
        modes.set(BehaviorKind::AntiAfk, true, None);
        store.save_modes("a1", &modes).await.unwrap();
        store.save_modes("a2", &ModeSet::default()).await.unwrap();

        let reopened = JsonFileModeStore::new(&path);
        let loaded = reopened.load_modes("a1").await.unwrap();
        assert!(loaded.is_enabled(BehaviorKind::Follow));
        assert_eq!(
            loaded.enabled(),
            vec![
                (BehaviorKind::Follow, json!({"target": "alice"})),
                (BehaviorKind::AntiAfk, Value::Null),
            ]
        );
        assert!(!reopened.load_modes("a2").await.unwrap().is_enabled(BehaviorKind::Follow));
    }

    #[test]
    fn test_disable_keeps_options_and_clear_resets_flags() {
        let mut modes = ModeSet::default();
        modes.set(BehaviorKind::Patrol, true, Some(json!({"radius": 5})));
        modes.set(BehaviorKind::Patrol, false, None);
        assert!(!modes.is_enabled(BehaviorKind::Patrol));
        modes.set(BehaviorKind::Patrol, true, None);
        assert_eq!(modes.enabled(), vec![(BehaviorKind::Patrol, json!({"radius": 5}))]);

        modes.clear();
        assert!(modes.enabled().is_empty());
        assert_eq!(modes.flags().len(), BehaviorKind::ALL.len());
    }

    #[tokio::test]
    async fn test_book_persists_and_broadcasts_changes() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let store = Arc::new(MemoryModeStore::new());
        let book = ModeBook::new("a1", store.clone(), bus);

        book.set(BehaviorKind::Guard, true, Some(Value::Null)).await;
        assert!(store.load_modes("a1").await.unwrap().is_enabled(BehaviorKind::Guard));
        assert!(matches!(rx.try_recv(), Ok(KeeperEvent::ModesChanged { .. })));

        // 无变化不广播
        book.set(BehaviorKind::Guard, true, None).await;
        assert!(rx.try_recv().is_err());
    }
}

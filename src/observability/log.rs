//! 代理日志：有界环形缓冲 + 事件广播
//!
//! 每条用户可见的状态转换同时写入 tracing、缓冲区（最近 100 条）和 KeeperEvent::Log。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::events::{EventBus, KeeperEvent};

pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub agent_id: String,
    pub level: LogLevel,
    pub message: String,
}

pub struct AgentLog {
    agent_id: String,
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    bus: EventBus,
}

impl AgentLog {
    pub fn new(agent_id: impl Into<String>, bus: EventBus) -> Self {
        Self {
            agent_id: agent_id.into(),
            capacity: LOG_CAPACITY,
            entries: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)),
            bus,
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let message = message.into();
        match level {
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(agent = %self.agent_id, "{}", message)
            }
            LogLevel::Warn => tracing::warn!(agent = %self.agent_id, "{}", message),
            LogLevel::Error => tracing::error!(agent = %self.agent_id, "{}", message),
        }
        let entry = LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            agent_id: self.agent_id.clone(),
            level,
            message,
        };
        {
            let mut entries = self.entries();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        self.bus.emit(KeeperEvent::Log {
            entry: entry.clone(),
        });
        entry
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(LogLevel::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }

    /// 最近 limit 条，按时间顺序（最旧在前）
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_keeps_latest() {
        let log = AgentLog::new("a1", EventBus::default());
        for i in 0..(LOG_CAPACITY + 20) {
            log.info(format!("line {}", i));
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        let recent = log.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].message, format!("line {}", LOG_CAPACITY + 19));
        assert_eq!(log.recent(1000).len(), LOG_CAPACITY);
    }

    #[tokio::test]
    async fn test_push_broadcasts_entry() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let log = AgentLog::new("a1", bus);
        log.warn("stale session");
        match rx.recv().await.unwrap() {
            KeeperEvent::Log { entry } => {
                assert_eq!(entry.level, LogLevel::Warn);
                assert_eq!(entry.agent_id, "a1");
                assert_eq!(entry.message, "stale session");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

//! 监管层集成测试：连接、自愈重连、模式恢复与行为自动停止的端到端流程

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use keeper::behavior::BehaviorKind;
    use keeper::config::{AgentEntry, BehaviorsSection, SupervisorSection};
    use keeper::core::{ConnectionState, KeeperError, StopReason};
    use keeper::observability::{EventBus, KeeperEvent};
    use keeper::session::{
        Entity, EntityKind, MockAction, MockConnector, MockWorld, SessionEvent, Vec3,
    };
    use keeper::supervisor::{ConnectionSupervisor, MemoryModeStore, ModeStore, SupervisorContext};
    use serde_json::{json, Value};
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::broadcast::Receiver;

    struct Fixture {
        agent: Arc<ConnectionSupervisor>,
        connector: MockConnector,
        store: Arc<MemoryModeStore>,
        bus: EventBus,
    }

    impl Fixture {
        fn world(&self) -> &MockWorld {
            self.connector.world()
        }

        fn logged(&self, needle: &str) -> usize {
            self.agent
                .recent_logs(100)
                .iter()
                .filter(|e| e.message.contains(needle))
                .count()
        }
    }

    fn fixture(host: &str) -> Fixture {
        let connector = MockConnector::new(MockWorld::new());
        let store = Arc::new(MemoryModeStore::new());
        let bus = EventBus::default();
        let ctx = SupervisorContext {
            connector: Arc::new(connector.clone()),
            config: SupervisorSection::default(),
            behaviors: Arc::new(BehaviorsSection::default()),
            store: store.clone(),
            bus: bus.clone(),
        };
        let agent = ConnectionSupervisor::new(
            AgentEntry {
                id: "a1".into(),
                host: host.into(),
                username: Some("Keeper".into()),
                ..AgentEntry::default()
            },
            ctx,
        );
        Fixture {
            agent,
            connector,
            store,
            bus,
        }
    }

    fn drain(rx: &mut Receiver<KeeperEvent>) -> Vec<KeeperEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_connected() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();

        assert_eq!(f.agent.state(), ConnectionState::Connected);
        let status = f.agent.status();
        assert!(status.connected);
        assert_eq!(status.server_address, "localhost:25565");
        assert_eq!(status.username.as_deref(), Some("Keeper"));
        assert_eq!(f.logged("Connected to localhost:25565 as Keeper"), 1);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["modes"]["antiAfk"], false);

        assert!(matches!(
            f.agent.connect().await,
            Err(KeeperError::AlreadyConnected)
        ));
        assert_eq!(f.connector.connect_count(), 1);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_host_is_fatal_and_not_retried() {
        let f = fixture("");
        assert!(matches!(
            f.agent.connect().await,
            Err(KeeperError::ConfigurationInvalid(_))
        ));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.connector.connect_count(), 0);
        assert_eq!(f.agent.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kicked_reconnects() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();

        f.world().emit(SessionEvent::Kicked("server restart".into()));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(f.connector.connect_count(), 2);
        assert_eq!(f.agent.state(), ConnectionState::Connected);
        assert_eq!(f.world().count_actions(|a| *a == MockAction::Quit), 1);
        assert_eq!(f.logged("kicked: server restart"), 1);
        assert_eq!(f.agent.status().reconnect_attempts, 0);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fails_then_retries() {
        let f = fixture("localhost");
        f.connector.set_hang(true);

        let err = f.agent.connect().await.unwrap_err();
        assert!(matches!(err, KeeperError::ConnectionFailed(_)));
        assert_eq!(f.agent.state(), ConnectionState::Disconnected);

        f.connector.set_hang(false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.connector.connect_count(), 2);
        assert_eq!(f.agent.state(), ConnectionState::Connected);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_keep_retrying() {
        let f = fixture("localhost");
        f.connector.fail_next(3);

        assert!(f.agent.connect().await.is_err());
        // 1s 后第一次重试，之后每 3s 一次
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(f.connector.connect_count(), 2);
        assert_eq!(f.agent.status().reconnect_attempts, 2);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(f.connector.connect_count(), 4);
        assert_eq!(f.agent.state(), ConnectionState::Connected);
        assert_eq!(f.agent.status().reconnect_attempts, 0);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_session_is_recycled() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(f.connector.connect_count(), 2);
        assert_eq!(f.logged("no activity for"), 1);
        assert_eq!(f.agent.state(), ConnectionState::Connected);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_keeps_session_alive() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();

        for i in 0..12 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            f.world()
                .emit(SessionEvent::Move(Vec3::new(i as f64, 64.0, 0.0)));
        }
        assert_eq!(f.connector.connect_count(), 1);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_disconnect_stops_reconnecting() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();
        f.agent.disconnect().unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.connector.connect_count(), 1);
        assert_eq!(f.agent.state(), ConnectionState::Disconnected);
        assert!(matches!(f.agent.disconnect(), Err(KeeperError::NotConnected)));

        // 显式 connect() 重新打开自动重连
        f.agent.connect().await.unwrap();
        assert_eq!(f.connector.connect_count(), 2);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_modes_restored_after_reconnect() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();
        f.agent
            .set_behavior("antiAfk", true, Value::Null)
            .await
            .unwrap();
        let first = f.agent.manager().unwrap();
        assert!(f
            .store
            .load_modes("a1")
            .await
            .unwrap()
            .is_enabled(BehaviorKind::AntiAfk));

        f.world().emit(SessionEvent::Error("socket reset".into()));
        tokio::time::sleep(Duration::from_secs(4)).await;

        let second = f.agent.manager().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.is_active(BehaviorKind::AntiAfk));
        assert!(second.is_active(BehaviorKind::AntiAfk));
        assert_eq!(f.logged("Restored 1 behaviors"), 1);
        f.agent.remove();
        assert!(!second.is_active(BehaviorKind::AntiAfk));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_disconnect_keeps_modes() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();
        f.agent
            .set_behavior("humanize", true, Value::Null)
            .await
            .unwrap();

        f.agent.soft_disconnect().unwrap();
        assert!(f.agent.modes().is_enabled(BehaviorKind::Humanize));
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(f.connector.connect_count(), 2);
        assert!(f
            .agent
            .manager()
            .unwrap()
            .is_active(BehaviorKind::Humanize));
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_target_lost_clears_mode_once() {
        let f = fixture("localhost");
        let mut rx = f.bus.subscribe();
        f.world().add_entity(Entity {
            id: 7,
            name: "alice".into(),
            kind: EntityKind::Player,
            position: Vec3::new(5.0, 64.0, 0.0),
            height: 1.8,
        });
        f.agent.connect().await.unwrap();
        f.agent
            .set_behavior("follow", true, json!({ "target": "alice" }))
            .await
            .unwrap();
        assert!(f.agent.modes().is_enabled(BehaviorKind::Follow));

        f.world().remove_entity(7);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!f.agent.modes().is_enabled(BehaviorKind::Follow));
        assert!(!f.agent.manager().unwrap().is_active(BehaviorKind::Follow));
        assert_eq!(f.logged("auto-stopped: target_lost"), 1);
        let stopped: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                KeeperEvent::BehaviorStopped {
                    behavior, reason, ..
                } => Some((behavior, reason)),
                _ => None,
            })
            .collect();
        assert_eq!(stopped, vec![(BehaviorKind::Follow, StopReason::TargetLost)]);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_stops_behaviors_and_respawn_restores() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();
        f.agent
            .set_behavior("antiAfk", true, Value::Null)
            .await
            .unwrap();

        f.world().emit(SessionEvent::Death);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let manager = f.agent.manager().unwrap();
        assert!(!manager.is_active(BehaviorKind::AntiAfk));
        assert!(f.agent.modes().is_enabled(BehaviorKind::AntiAfk));
        assert_eq!(f.world().count_actions(|a| *a == MockAction::Respawn), 1);

        f.world().emit(SessionEvent::Respawn);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(manager.is_active(BehaviorKind::AntiAfk));
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_before_spawn_restore_cancels_it() {
        let f = fixture("localhost");
        f.agent
            .modes()
            .set(BehaviorKind::AntiAfk, true, None)
            .await;
        f.agent.connect().await.unwrap();
        let manager = f.agent.manager().unwrap();

        // 恢复延迟尚未到期即死亡
        f.world().emit(SessionEvent::Death);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!manager.is_active(BehaviorKind::AntiAfk));
        assert_eq!(f.logged("Restored"), 0);
        assert!(f.agent.modes().is_enabled(BehaviorKind::AntiAfk));

        f.world().emit(SessionEvent::Respawn);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(manager.is_active(BehaviorKind::AntiAfk));
        assert_eq!(f.logged("Restored 1 behaviors"), 1);
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_commands_reply_through_channel() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();

        f.world().emit(SessionEvent::Chat {
            username: "alice".into(),
            message: "!pos".into(),
        });
        // 自己的消息不响应
        f.world().emit(SessionEvent::Chat {
            username: "Keeper".into(),
            message: "!help".into(),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.world().chats(), vec!["I'm at 0 64 0".to_string()]);

        // 冷却结束后执行 !stop
        tokio::time::sleep(Duration::from_secs(4)).await;
        f.world().emit(SessionEvent::Chat {
            username: "alice".into(),
            message: "!stop".into(),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.world().chats().last().map(String::as_str), Some("Stopped (0)"));
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_commands_never_touch_persisted_modes() {
        let f = fixture("localhost");
        f.world().add_entity(Entity {
            id: 7,
            name: "griefer".into(),
            kind: EntityKind::Player,
            position: Vec3::new(10.0, 64.0, 0.0),
            height: 1.8,
        });
        f.agent.connect().await.unwrap();
        f.agent
            .set_behavior("antiAfk", true, Value::Null)
            .await
            .unwrap();
        let first = f.agent.manager().unwrap();

        f.world().emit(SessionEvent::Chat {
            username: "griefer".into(),
            message: "!stop".into(),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!first.is_active(BehaviorKind::AntiAfk));
        assert!(f.agent.modes().is_enabled(BehaviorKind::AntiAfk));
        assert!(f
            .store
            .load_modes("a1")
            .await
            .unwrap()
            .is_enabled(BehaviorKind::AntiAfk));

        // !come 是一次性的：不会变成持久的跟随
        f.world().emit(SessionEvent::Chat {
            username: "griefer".into(),
            message: "!come".into(),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!f.agent.modes().is_enabled(BehaviorKind::Follow));

        f.agent.soft_disconnect().unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        let second = f.agent.manager().unwrap();
        assert!(second.is_active(BehaviorKind::AntiAfk));
        assert!(!second.is_active(BehaviorKind::Follow));
        f.agent.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_require_connection() {
        let f = fixture("localhost");
        assert!(matches!(
            f.agent.set_behavior("patrol", true, Value::Null).await,
            Err(KeeperError::NotConnected)
        ));
        assert!(matches!(
            f.agent.do_action("jump", Value::Null).await,
            Err(KeeperError::NotConnected)
        ));
        assert!(matches!(
            f.agent.soft_disconnect(),
            Err(KeeperError::NotConnected)
        ));
        let ack = f.agent.stop_all().await;
        assert!(ack.stopped.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_agent_never_reconnects() {
        let f = fixture("localhost");
        f.agent.connect().await.unwrap();
        f.world().emit(SessionEvent::End);
        f.agent.remove();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.connector.connect_count(), 1);
        assert_eq!(f.agent.state(), ConnectionState::Removed);
        assert!(matches!(f.agent.connect().await, Err(KeeperError::Removed)));
    }
}

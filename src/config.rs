//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KEEPER__*` 覆盖（双下划线表示嵌套，
//! 如 `KEEPER__SUPERVISOR__STALE_AFTER_SECS=120`）。
//! 行为段中的每个参数都可以在 `start(options)` 时用 camelCase 键单独覆盖。

use std::path::PathBuf;

use serde::Deserialize;

use crate::behavior::TargetMode;
use crate::session::Vec3;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub supervisor: SupervisorSection,
    pub behaviors: BehaviorsSection,
    pub agents: Vec<AgentEntry>,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 模式开关持久化文件（JSON）；未设置时只保存在内存
    pub modes_path: Option<PathBuf>,
}

/// [supervisor] 段：连接、看门狗与重连
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    /// 等待 spawn 的上限（秒）
    pub connect_timeout_secs: u64,
    pub watchdog_interval_secs: u64,
    /// 超过该时长无任何入站事件即视为卡死
    pub stale_after_secs: u64,
    pub reconnect_delay_ms: u64,
    pub retry_delay_ms: u64,
    /// 不设置则无限重试
    pub max_reconnect_attempts: Option<u32>,
    /// spawn 后恢复已启用行为前的等待
    pub restore_delay_ms: u64,
    pub respawn_delay_ms: u64,
    pub restart_command: String,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            watchdog_interval_secs: 10,
            stale_after_secs: 60,
            reconnect_delay_ms: 1000,
            retry_delay_ms: 3000,
            max_reconnect_attempts: None,
            restore_delay_ms: 2000,
            respawn_delay_ms: 500,
            restart_command: "/restart".to_string(),
        }
    }
}

/// [behaviors] 段：各行为的默认参数
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BehaviorsSection {
    pub follow: FollowSection,
    pub attack: AttackSection,
    pub patrol: PatrolSection,
    pub mining: MiningSection,
    pub guard: GuardSection,
    pub fishing: FishingSection,
    pub idle: IdleSection,
    pub auto_eat: AutoEatSection,
    pub ai_view: AiViewSection,
    pub chat: ChatSection,
    pub workflow: WorkflowSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FollowSection {
    pub interval_ms: u64,
    /// 连续多少个 tick 看不到目标后自动停止
    pub max_unseen_ticks: u32,
    /// 进入该距离后释放移动请求
    pub min_distance: f64,
    /// 超过该距离才请求跟随
    pub max_distance: f64,
}

impl Default for FollowSection {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_unseen_ticks: 5,
            min_distance: 2.0,
            max_distance: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttackSection {
    pub interval_ms: u64,
    pub range: f64,
    /// 自身生命值 ≤ 该值时自动停止
    pub health_floor: f32,
    pub mode: TargetMode,
    /// 永不攻击的名字
    pub whitelist: Vec<String>,
}

impl Default for AttackSection {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            range: 4.0,
            health_floor: 6.0,
            mode: TargetMode::Hostile,
            whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatrolSection {
    pub interval_ms: u64,
    /// 单次移动超时，到时强制释放移动
    pub move_timeout_ms: u64,
    pub radius: f64,
    pub tolerance: f64,
    /// 非空时按顺序循环巡逻
    pub waypoints: Vec<Vec3>,
}

impl Default for PatrolSection {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            move_timeout_ms: 10_000,
            radius: 12.0,
            tolerance: 1.0,
            waypoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiningSection {
    /// 找不到目标时的重扫间隔
    pub rescan_ms: u64,
    pub error_backoff_ms: u64,
    pub range: f64,
    /// 空闲格子低于该值时自动停止
    pub min_free_slots: usize,
    pub targets: Vec<String>,
    pub arrive_timeout_ms: u64,
    pub tolerance: f64,
}

impl Default for MiningSection {
    fn default() -> Self {
        Self {
            rescan_ms: 5000,
            error_backoff_ms: 2000,
            range: 32.0,
            min_free_slots: 1,
            targets: vec![
                "coal_ore".into(),
                "iron_ore".into(),
                "gold_ore".into(),
                "diamond_ore".into(),
                "emerald_ore".into(),
            ],
            arrive_timeout_ms: 10_000,
            tolerance: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardSection {
    pub interval_ms: u64,
    pub radius: f64,
    pub strike_range: f64,
    pub health_floor: f32,
    /// 两次追击请求之间的最小间隔，避免目标抖动
    pub reissue_cooldown_ms: u64,
    pub standoff: f64,
}

impl Default for GuardSection {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            radius: 16.0,
            strike_range: 3.5,
            health_floor: 8.0,
            reissue_cooldown_ms: 2000,
            standoff: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FishingSection {
    pub cast_timeout_secs: u64,
    pub rod_item: String,
    pub error_backoff_ms: u64,
}

impl Default for FishingSection {
    fn default() -> Self {
        Self {
            cast_timeout_secs: 30,
            rod_item: "fishing_rod".to_string(),
            error_backoff_ms: 2000,
        }
    }
}

/// AntiAfk / Humanize / SafeIdle 共用
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdleSection {
    pub anti_afk_interval_ms: u64,
    pub humanize_interval_ms: u64,
    pub safe_idle_interval_ms: u64,
    /// 间隔抖动比例（0.5 表示 ±50%）
    pub jitter: f64,
    /// 移动中位置无进展超过该时长则强制停止
    pub stuck_timeout_ms: u64,
    pub step_distance: f64,
}

impl Default for IdleSection {
    fn default() -> Self {
        Self {
            anti_afk_interval_ms: 30_000,
            humanize_interval_ms: 5000,
            safe_idle_interval_ms: 3000,
            jitter: 0.5,
            stuck_timeout_ms: 8000,
            step_distance: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoEatSection {
    pub interval_ms: u64,
    pub health_floor: f32,
    pub food_floor: f32,
    pub foods: Vec<String>,
}

impl Default for AutoEatSection {
    fn default() -> Self {
        Self {
            interval_ms: 1500,
            health_floor: 14.0,
            food_floor: 14.0,
            foods: vec![
                "cooked_beef".into(),
                "cooked_porkchop".into(),
                "bread".into(),
                "baked_potato".into(),
                "cooked_chicken".into(),
                "apple".into(),
                "carrot".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiViewSection {
    pub interval_ms: u64,
    pub range: f64,
}

impl Default for AiViewSection {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            range: 16.0,
        }
    }
}

/// 出站聊天限流与自动喊话
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub global_cooldown_secs: f64,
    pub max_per_minute: usize,
    pub auto_interval_secs: u64,
    pub messages: Vec<String>,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            global_cooldown_secs: 3.0,
            max_per_minute: 10,
            auto_interval_secs: 60,
            messages: vec!["Hello!".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub steps: Vec<String>,
    pub mining_max_secs: f64,
    pub patrol_max_secs: f64,
    pub rest_secs: f64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            steps: vec!["mining".into(), "patrol".into(), "rest".into()],
            mining_max_secs: 300.0,
            patrol_max_secs: 120.0,
            rest_secs: 60.0,
        }
    }
}

/// [[agents]] 段：单个代理的连接参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentEntry {
    pub id: String,
    pub name: Option<String>,
    pub host: String,
    pub port: u16,
    /// 未设置时生成 `Bot_xxxxxx`
    pub username: Option<String>,
    pub version: Option<String>,
    /// 定时发送重启命令的间隔（分钟），0 表示关闭
    pub restart_minutes: u64,
}

impl Default for AgentEntry {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: None,
            host: String::new(),
            port: 25565,
            username: None,
            version: None,
            restart_minutes: 0,
        }
    }
}

impl AgentEntry {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Server {}", self.id))
    }
}

/// 从 config 目录加载配置，环境变量 KEEPER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KEEPER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KEEPER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.supervisor.connect_timeout_secs, 15);
        assert_eq!(cfg.supervisor.watchdog_interval_secs, 10);
        assert_eq!(cfg.supervisor.stale_after_secs, 60);
        assert!(cfg.supervisor.max_reconnect_attempts.is_none());
        assert_eq!(cfg.behaviors.follow.max_unseen_ticks, 5);
        assert_eq!(cfg.behaviors.patrol.move_timeout_ms, 10_000);
        assert_eq!(
            cfg.behaviors.workflow.steps,
            vec!["mining".to_string(), "patrol".into(), "rest".into()]
        );
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keeper.toml");
        std::fs::write(
            &path,
            r#"
[supervisor]
stale_after_secs = 120

[behaviors.attack]
mode = "player"

[[agents]]
id = "a1"
host = "mc.example.org"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.supervisor.stale_after_secs, 120);
        assert_eq!(cfg.supervisor.connect_timeout_secs, 15);
        assert_eq!(cfg.behaviors.attack.mode, TargetMode::Player);
        assert_eq!(cfg.agents.len(), 1);
        assert_eq!(cfg.agents[0].port, 25565);
        assert_eq!(cfg.agents[0].display_name(), "Server a1");
    }
}

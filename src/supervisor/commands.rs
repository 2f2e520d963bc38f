//! 游戏内聊天命令（`!help` 等），回复经由限流聊天通道发出

use std::sync::Arc;

use serde_json::{json, Value};

use super::connection::ConnectionSupervisor;
use crate::behavior::BehaviorManager;

pub const HELP: &str =
    "Commands: !help !come !follow [name] !stop !pos !attack [mode] !patrol !mine !jump !sneak";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Help,
    /// 跟随发出命令的玩家
    Come,
    Follow(Option<String>),
    Stop,
    Pos,
    Attack(Option<String>),
    Patrol,
    Mine,
    Jump,
    Sneak,
}

impl ChatCommand {
    /// 非 `!` 开头或未知命令返回 None
    pub fn parse(message: &str) -> Option<Self> {
        let mut parts = message.trim().strip_prefix('!')?.split_whitespace();
        let name = parts.next()?.to_ascii_lowercase();
        let arg = parts.next().map(str::to_string);
        let command = match name.as_str() {
            "help" => ChatCommand::Help,
            "come" => ChatCommand::Come,
            "follow" => ChatCommand::Follow(arg),
            "stop" => ChatCommand::Stop,
            "pos" => ChatCommand::Pos,
            "attack" => ChatCommand::Attack(arg),
            "patrol" => ChatCommand::Patrol,
            "mine" => ChatCommand::Mine,
            "jump" => ChatCommand::Jump,
            "sneak" => ChatCommand::Sneak,
            _ => return None,
        };
        Some(command)
    }
}

/// 执行命令并返回要回复的文本
///
/// 聊天命令只影响当前会话：不会改写操作员持久化的模式开关，重连后按开关恢复。
pub async fn execute(
    supervisor: &Arc<ConnectionSupervisor>,
    manager: &Arc<BehaviorManager>,
    from: &str,
    command: ChatCommand,
) -> String {
    tracing::info!(agent = %supervisor.id(), from = %from, command = ?command, "Chat command");
    let result = match command {
        ChatCommand::Help => return HELP.to_string(),
        ChatCommand::Pos => {
            return match manager.handle().position() {
                Some(p) => {
                    let (x, y, z) = p.floored();
                    format!("I'm at {} {} {}", x, y, z)
                }
                None => "Position unknown".to_string(),
            }
        }
        ChatCommand::Come => manager
            .start_transient("follow", json!({ "target": from, "untilArrived": true }))
            .map(|_| "Coming!".to_string()),
        ChatCommand::Follow(target) => {
            let target = target.unwrap_or_else(|| from.to_string());
            manager
                .start_transient("follow", json!({ "target": target }))
                .map(|_| format!("Following {}", target))
        }
        ChatCommand::Stop => {
            let ack = manager.stop_all();
            Ok(format!("Stopped ({})", ack.stopped.len()))
        }
        ChatCommand::Attack(mode) => {
            let options = match mode {
                Some(mode) => json!({ "mode": mode }),
                None => Value::Null,
            };
            manager
                .start_transient("attack", options)
                .map(|_| "Attack mode on".to_string())
        }
        ChatCommand::Patrol => manager
            .start_transient("patrol", Value::Null)
            .map(|_| "Patrolling".to_string()),
        ChatCommand::Mine => manager
            .start_transient("mining", Value::Null)
            .map(|_| "Mining".to_string()),
        ChatCommand::Jump => manager
            .do_action("jump", Value::Null)
            .await
            .map(|o| o.message),
        ChatCommand::Sneak => manager
            .do_action("sneak", Value::Null)
            .await
            .map(|o| format!("Sneak {}", o.message)),
    };
    supervisor.emit_status();
    result.unwrap_or_else(|e| format!("Error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ChatCommand::parse("!help"), Some(ChatCommand::Help));
        assert_eq!(
            ChatCommand::parse("  !follow Alice extra"),
            Some(ChatCommand::Follow(Some("Alice".into())))
        );
        assert_eq!(ChatCommand::parse("!follow"), Some(ChatCommand::Follow(None)));
        assert_eq!(
            ChatCommand::parse("!ATTACK all"),
            Some(ChatCommand::Attack(Some("all".into())))
        );
        assert_eq!(ChatCommand::parse("hello !stop"), None);
        assert_eq!(ChatCommand::parse("!dance"), None);
        assert_eq!(ChatCommand::parse("!"), None);
    }
}

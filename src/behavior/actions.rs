//! 一次性动作（doAction）：跳跃、潜行、疾跑、使用物品、挥手、看向坐标、进食

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::auto_eat::pick_food;
use super::options::Options;
use super::BehaviorContext;
use crate::core::{KeeperError, Result};
use crate::session::{ControlState, Vec3};

const JUMP_PULSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub message: String,
}

impl ActionOutcome {
    fn new(action: &str, message: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            message: message.into(),
        }
    }
}

pub const ACTIONS: &[&str] = &["jump", "sneak", "sprint", "useItem", "swing", "lookAt", "eat"];

pub async fn perform(ctx: &BehaviorContext, name: &str, params: &Value) -> Result<ActionOutcome> {
    let opts = Options::parse(params)?;
    let handle = &ctx.handle;
    if !handle.is_live() {
        return Err(KeeperError::NotConnected);
    }

    match name {
        "jump" => {
            handle.set_control_state(ControlState::Jump, true);
            tokio::time::sleep(JUMP_PULSE).await;
            handle.set_control_state(ControlState::Jump, false);
            Ok(ActionOutcome::new(name, "jumped"))
        }
        "sneak" | "sprint" => {
            let control = if name == "sneak" {
                ControlState::Sneak
            } else {
                ControlState::Sprint
            };
            let current = handle.control_state(control);
            let enabled = opts.bool("enabled", !current)?;
            handle.set_control_state(control, enabled);
            Ok(ActionOutcome::new(
                name,
                if enabled { "enabled" } else { "disabled" },
            ))
        }
        "useItem" | "use_item" => {
            handle.activate_item();
            Ok(ActionOutcome::new(name, "item used"))
        }
        "swing" => {
            handle.swing_arm();
            Ok(ActionOutcome::new(name, "swung"))
        }
        "lookAt" | "look_at" => {
            let target = match opts.vec3("position")? {
                Some(p) => p,
                None => Vec3::new(
                    required(&opts, "x")?,
                    required(&opts, "y")?,
                    required(&opts, "z")?,
                ),
            };
            handle.look_at(target);
            Ok(ActionOutcome::new(name, format!("looking at {:?}", target.floored())))
        }
        "eat" => {
            let foods = opts.strings("foods", &ctx.config.auto_eat.foods)?;
            let food = pick_food(handle, &foods)
                .ok_or_else(|| KeeperError::PreconditionFailed("no food in inventory".to_string()))?;
            handle.equip(&food).await?;
            handle.consume().await?;
            Ok(ActionOutcome::new(name, format!("ate {}", food)))
        }
        other => Err(KeeperError::UnknownAction(other.to_string())),
    }
}

fn required(opts: &Options<'_>, key: &str) -> Result<f64> {
    if opts.get(key).is_none() {
        return Err(KeeperError::InvalidOptions(format!("'{}' is required", key)));
    }
    opts.f64(key, 0.0)
}

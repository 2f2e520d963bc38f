//! start(options) 参数读取：camelCase 键覆盖配置默认值

use std::time::Duration;

use serde_json::{Map, Value};

use crate::core::{KeeperError, Result};
use crate::session::Vec3;

/// 对 options JSON 的只读视图；Null 视为空对象
pub struct Options<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Options<'a> {
    pub fn parse(value: &'a Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self { map: None }),
            Value::Object(map) => Ok(Self { map: Some(map) }),
            other => Err(KeeperError::InvalidOptions(format!(
                "options must be an object, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_null())
    }

    pub fn f64(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| invalid(key, "a number")),
        }
    }

    pub fn f32(&self, key: &str, default: f32) -> Result<f32> {
        self.f64(key, f64::from(default)).map(|v| v as f32)
    }

    pub fn u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| invalid(key, "a non-negative integer")),
        }
    }

    pub fn millis(&self, key: &str, default_ms: u64) -> Result<Duration> {
        self.u64(key, default_ms).map(Duration::from_millis)
    }

    pub fn seconds(&self, key: &str, default_secs: f64) -> Result<Duration> {
        let secs = self.f64(key, default_secs)?;
        if secs < 0.0 {
            return Err(invalid(key, "a non-negative number of seconds"));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|_| invalid(key, "a representable number of seconds"))
    }

    pub fn bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| invalid(key, "a boolean")),
        }
    }

    pub fn str(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(invalid(key, "a string")),
        }
    }

    pub fn strings(&self, key: &str, default: &[String]) -> Result<Vec<String>> {
        match self.get(key) {
            None => Ok(default.to_vec()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(key, "a list of strings"))
                })
                .collect(),
            Some(_) => Err(invalid(key, "a list of strings")),
        }
    }

    pub fn vec3(&self, key: &str) -> Result<Option<Vec3>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|_| invalid(key, "an {x, y, z} object")),
        }
    }

    pub fn vec3_list(&self, key: &str, default: &[Vec3]) -> Result<Vec<Vec3>> {
        match self.get(key) {
            None => Ok(default.to_vec()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|_| invalid(key, "a list of {x, y, z} objects")),
        }
    }

    /// 嵌套对象（如工作流的 stepOptions），不存在时返回 Null
    pub fn object(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or(Value::Null)
    }
}

fn invalid(key: &str, expected: &str) -> KeeperError {
    KeeperError::InvalidOptions(format!("'{}' must be {}", key, expected))
}

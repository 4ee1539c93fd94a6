use crate::domain::models::TimerConfig;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;
const DEFAULT_APP_NAME: &str = "PomodorroFly";
const DEFAULT_SESSION_SERVICE: &str = "pomofly.session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerDefaults {
    pub focus_seconds: u32,
    pub small_break_seconds: u32,
    pub big_break_seconds: u32,
    pub sessions_per_cycle: u32,
}

impl From<TimerDefaults> for TimerConfig {
    fn from(value: TimerDefaults) -> Self {
        Self {
            focus_seconds: value.focus_seconds,
            small_break_seconds: value.small_break_seconds,
            big_break_seconds: value.big_break_seconds,
            sessions_per_cycle: value.sessions_per_cycle,
        }
    }
}

impl From<TimerConfig> for TimerDefaults {
    fn from(value: TimerConfig) -> Self {
        Self {
            focus_seconds: value.focus_seconds,
            small_break_seconds: value.small_break_seconds,
            big_break_seconds: value.big_break_seconds,
            sessions_per_cycle: value.sessions_per_cycle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_name: String,
    pub session_service: String,
    pub timer: TimerConfig,
}

fn default_app_json() -> serde_json::Value {
    serde_json::json!({
        "schema": SUPPORTED_SCHEMA,
        "appName": DEFAULT_APP_NAME,
        "sessionService": DEFAULT_SESSION_SERVICE,
        "timer": TimerDefaults::from(TimerConfig::default()),
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let app = read_config(&path)?;

    let app_name = read_trimmed_string(&app, "appName").unwrap_or(DEFAULT_APP_NAME);
    let session_service =
        read_trimmed_string(&app, "sessionService").unwrap_or(DEFAULT_SESSION_SERVICE);

    let timer = match app.get("timer") {
        Some(value) => {
            let defaults: TimerDefaults = serde_json::from_value(value.clone()).map_err(|error| {
                InfraError::InvalidConfig(format!("invalid timer section in {}: {error}", path.display()))
            })?;
            TimerConfig::from(defaults)
        }
        None => TimerConfig::default(),
    };
    timer.validate().map_err(InfraError::InvalidConfig)?;

    Ok(AppConfig {
        app_name: app_name.to_string(),
        session_service: session_service.to_string(),
        timer,
    })
}

fn read_trimmed_string<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

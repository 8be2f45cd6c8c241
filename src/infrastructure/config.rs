use crate::infrastructure::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const ENGINE_JSON: &str = "engine.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub schema: u8,
    /// Preset countdown duration (the "pomodoro" mode), in seconds.
    pub preset_duration_seconds: u32,
    /// Maximum retained session-log entries before the oldest are dropped.
    pub session_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            preset_duration_seconds: 25 * 60,
            session_log_capacity: 200,
        }
    }
}

pub fn ensure_default_config(config_dir: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(config_dir)?;
    let path = config_dir.join(ENGINE_JSON);
    if !path.exists() {
        let payload = serde_json::to_string_pretty(&EngineConfig::default())?;
        fs::write(path, payload)?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<EngineConfig, EngineError> {
    let raw = fs::read_to_string(config_dir.join(ENGINE_JSON))?;
    let config: EngineConfig = serde_json::from_str(&raw)?;
    if config.preset_duration_seconds == 0 {
        return Err(EngineError::Validation(
            "engine.preset_duration_seconds must be > 0".to_string(),
        ));
    }
    Ok(config)
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub store_path: Option<String>,
    pub metrics_port: Option<u16>,
    pub threads: Option<usize>,
    pub max_attempts: Option<u8>,
    pub retry_delay_ms: Option<u64>,
    pub default_execution_timeout_secs: Option<u64>,
    pub retention_days: Option<u32>,
    pub poll_interval_ms: Option<u64>,

    // File only
    pub reaper_interval_secs: Option<u64>,
    pub purge_interval_hours: Option<u64>,
    pub activity_window_secs: Option<u64>,
    pub clear_started_on_startup: Option<bool>,
    pub shutdown_grace_secs: Option<u64>,

    /// Command action connections, name to SQLite file.
    pub connections: Option<HashMap<String, String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

mod file_config;

pub use file_config::FileConfig;

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STORE_PATH: &str = "action_queue.db";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub store_path: Option<PathBuf>,
    pub metrics_port: u16,
    /// `None` means one per available CPU.
    pub threads: Option<usize>,
    pub max_attempts: u8,
    pub retry_delay_ms: u64,
    pub default_execution_timeout_secs: u64,
    pub retention_days: u32,
    pub poll_interval_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        let defaults = QueueSettings::default();
        Self {
            store_path: None,
            metrics_port: 0,
            threads: None,
            max_attempts: defaults.max_attempts,
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
            default_execution_timeout_secs: defaults.default_execution_timeout.as_secs(),
            retention_days: defaults.retention_days,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

/// Runtime settings of the queue engine.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    /// Queue database file.
    pub store_path: PathBuf,
    /// Claim batch size and soft concurrency target.
    pub threads: usize,
    pub max_attempts: u8,
    pub retry_delay: Duration,
    /// Timeout of handler actions without their own `timeout_ms`.
    pub default_execution_timeout: Duration,
    pub retention_days: u32,
    pub poll_interval: Duration,
    pub reaper_interval: Duration,
    pub purge_interval: Duration,
    /// Started rows older than this do not count toward claim backpressure.
    pub activity_window: Duration,
    pub clear_started_on_startup: bool,
    pub shutdown_grace: Duration,
    /// Named SQLite files for `command` actions. The queue database itself
    /// is the default connection unless `""` is configured here.
    pub connections: HashMap<String, PathBuf>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_attempts: 3,
            retry_delay: Duration::from_millis(123),
            default_execution_timeout: Duration::from_secs(30 * 60),
            retention_days: 3,
            poll_interval: Duration::from_secs(1),
            reaper_interval: Duration::from_secs(60),
            purge_interval: Duration::from_secs(24 * 60 * 60),
            activity_window: Duration::from_secs(10 * 60),
            clear_started_on_startup: true,
            shutdown_grace: Duration::from_secs(30),
            connections: HashMap::new(),
        }
    }
}

impl QueueSettings {
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            bail!("threads must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be positive");
        }
        if self.reaper_interval.is_zero() || self.purge_interval.is_zero() {
            bail!("reaper and purge intervals must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub queue: QueueSettings,
    /// Port of the Prometheus endpoint, 0 disables it.
    pub metrics_port: u16,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let defaults = QueueSettings::default();

        let store_path = file
            .store_path
            .map(PathBuf::from)
            .or_else(|| cli.store_path.clone())
            .unwrap_or(defaults.store_path);
        if store_path.is_dir() {
            bail!("store_path is a directory: {:?}", store_path);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let threads = file.threads.or(cli.threads).unwrap_or(defaults.threads);
        let max_attempts = file.max_attempts.unwrap_or(cli.max_attempts);
        let retry_delay = Duration::from_millis(file.retry_delay_ms.unwrap_or(cli.retry_delay_ms));
        let default_execution_timeout = Duration::from_secs(
            file.default_execution_timeout_secs
                .unwrap_or(cli.default_execution_timeout_secs),
        );
        let retention_days = file.retention_days.unwrap_or(cli.retention_days);
        let poll_interval =
            Duration::from_millis(file.poll_interval_ms.unwrap_or(cli.poll_interval_ms));

        let queue = QueueSettings {
            store_path,
            threads,
            max_attempts,
            retry_delay,
            default_execution_timeout,
            retention_days,
            poll_interval,
            reaper_interval: file
                .reaper_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            purge_interval: file
                .purge_interval_hours
                .map(|hours| Duration::from_secs(hours * 60 * 60))
                .unwrap_or(defaults.purge_interval),
            activity_window: file
                .activity_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.activity_window),
            clear_started_on_startup: file
                .clear_started_on_startup
                .unwrap_or(defaults.clear_started_on_startup),
            shutdown_grace: file
                .shutdown_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            connections: file
                .connections
                .unwrap_or_default()
                .into_iter()
                .map(|(name, path)| (name, PathBuf::from(path)))
                .collect(),
        };
        queue.validate()?;

        Ok(AppConfig {
            queue,
            metrics_port,
        })
    }
}

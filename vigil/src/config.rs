use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::message::{Task, TaskKind};

// Parses a duration string (e.g., "5s", "1m") into a `Duration`.
// Used for deserializing duration values from the config file.
fn parse_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Configuration of the dispatcher's worker pool.
/// Corresponds to the [worker] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    // Upper bound of worker runs in flight across all kinds.
    #[serde(default = "WorkerConfig::default_num_instance")]
    pub num_instance: usize,
}

impl WorkerConfig {
    fn default_num_instance() -> usize {
        10
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_instance: Self::default_num_instance(),
        }
    }
}

/// DNS step settings, [resolver] section.
#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    #[serde(
        default = "ResolverConfig::default_timeout",
        deserialize_with = "parse_duration"
    )]
    pub timeout: Duration,

    #[serde(default = "ResolverConfig::default_prefer_ipv4")]
    pub prefer_ipv4: bool,
}

impl ResolverConfig {
    fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }
    fn default_prefer_ipv4() -> bool {
        true
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: Self::default_timeout(),
            prefer_ipv4: Self::default_prefer_ipv4(),
        }
    }
}

/// [command] section.
#[derive(Debug, Deserialize, Clone)]
pub struct CommandConfig {
    // Multiplier applied to timeout x attempts to get a command's wall-clock budget.
    #[serde(default = "CommandConfig::default_budget_factor")]
    pub budget_factor: u32,
}

impl CommandConfig {
    fn default_budget_factor() -> u32 {
        2
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            budget_factor: Self::default_budget_factor(),
        }
    }
}

/// [ping] section.
#[derive(Debug, Deserialize, Clone)]
pub struct PingConfig {
    #[serde(default = "PingConfig::default_program")]
    pub program: String,

    // Packets sent by one invocation of the ping program.
    #[serde(default = "PingConfig::default_packet_count")]
    pub packet_count: u32,

    pub packet_size: Option<u32>,
}

impl PingConfig {
    fn default_program() -> String {
        "ping".to_string()
    }
    fn default_packet_count() -> u32 {
        3
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            packet_count: Self::default_packet_count(),
            packet_size: None,
        }
    }
}

/// [download] section.
#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "DownloadConfig::default_folder")]
    pub folder: PathBuf,

    // Keep downloaded files instead of deleting them after the probe.
    #[serde(default)]
    pub keep_files: bool,

    // Highest numbered variant tried when picking a free file name.
    #[serde(default = "DownloadConfig::default_max_file_suffix")]
    pub max_file_suffix: u32,

    #[serde(
        default = "DownloadConfig::default_liveness_check_interval",
        deserialize_with = "parse_duration"
    )]
    pub liveness_check_interval: Duration,

    // Wall-clock budget of one download probe, redirects and transfer included.
    #[serde(
        default = "DownloadConfig::default_executor_timeout",
        deserialize_with = "parse_duration"
    )]
    pub executor_timeout: Duration,
}

impl DownloadConfig {
    fn default_folder() -> PathBuf {
        std::env::temp_dir().join("vigil")
    }
    fn default_max_file_suffix() -> u32 {
        25
    }
    fn default_liveness_check_interval() -> Duration {
        Duration::from_secs(5)
    }
    fn default_executor_timeout() -> Duration {
        Duration::from_secs(30 * 60)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            folder: Self::default_folder(),
            keep_files: false,
            max_file_suffix: Self::default_max_file_suffix(),
            liveness_check_interval: Self::default_liveness_check_interval(),
            executor_timeout: Self::default_executor_timeout(),
        }
    }
}

/// Configuration specific to the Reporter components.
/// Corresponds to the [reporter] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct ReporterConfig {
    // Whether to enable the stdout reporter.
    #[serde(default = "ReporterConfig::default_enable_stdout")]
    pub enable_stdout: bool,

    // Optional file path for file reporter. If specified, file reporter will be enabled.
    pub file_path: Option<String>,
}

impl ReporterConfig {
    fn default_enable_stdout() -> bool {
        true
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enable_stdout: Self::default_enable_stdout(),
            file_path: None,
        }
    }
}

/// A task definition seeded into the repository at startup, [[task]] entries.
#[derive(Debug, Deserialize, Clone)]
pub struct TaskConfig {
    pub id: i64,
    pub kind: TaskKind,
    pub address: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default = "TaskConfig::default_interval_minutes")]
    pub interval_minutes: u32,

    #[serde(default = "TaskConfig::default_attempts")]
    pub attempts: u32,

    #[serde(
        default = "TaskConfig::default_timeout",
        deserialize_with = "parse_duration"
    )]
    pub timeout: Duration,

    #[serde(default)]
    pub stop_on_success: bool,

    #[serde(default = "TaskConfig::default_running")]
    pub running: bool,
}

impl TaskConfig {
    fn default_interval_minutes() -> u32 {
        15
    }
    fn default_attempts() -> u32 {
        1
    }
    fn default_timeout() -> Duration {
        Duration::from_secs(5)
    }
    fn default_running() -> bool {
        true
    }

    /// Builds a stored task. Running tasks are started by the controller,
    /// so the task itself starts out stopped.
    pub fn to_task(&self, generation_id: i32) -> Task {
        Task {
            id: self.id,
            generation_id,
            kind: self.kind,
            address: self.address.clone(),
            port: self.port,
            interval_minutes: self.interval_minutes,
            attempts: self.attempts,
            timeout: self.timeout,
            stop_on_success: self.stop_on_success,
            ..Task::default()
        }
    }
}

/// Represents the overall application configuration, loaded from a TOML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub command: CommandConfig,

    #[serde(default)]
    pub ping: PingConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub reporter: ReporterConfig,

    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskConfig>,
}

impl Config {
    pub fn new(config_path: &Path) -> Result<Self> {
        Self::load_from_file(config_path)
    }

    // Loads configuration from a TOML file.
    fn load_from_file(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }
}

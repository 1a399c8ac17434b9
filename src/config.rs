//! Configuration for fanout
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (FANOUT_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::BackendType;
use crate::error::{Error, Result};
use crate::executor::ExecutorConfig;
use crate::packager::DEFAULT_MAX_PAYLOAD_BYTES;
use crate::partition::DEFAULT_MAX_PARTITION_BYTES;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Job execution settings
    pub executor: ExecutorSettings,

    /// Compute backend selection
    pub backend: BackendSettings,

    /// Input partitioning
    pub partitioner: PartitionerSettings,

    /// Task payload limits
    pub packager: PackagerSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Job execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Activations in flight at once across all jobs
    pub max_in_flight: usize,

    /// Resubmissions per task after transient faults
    pub max_retries: u32,

    /// First status poll interval in milliseconds
    pub poll_initial_interval_ms: u64,

    /// Poll interval ceiling in milliseconds
    pub poll_max_interval_ms: u64,

    /// Pending time after which a silent backend's task counts as running
    pub running_grace_ms: u64,

    /// Execution timeout per activation in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,

    /// Deadline for collecting a job's results in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,

    /// Run reducers even when some of their inputs failed
    pub partial_results: bool,

    /// Memory hint passed to the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
}

/// Compute backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Backend kind: local, process, mock
    pub kind: String,

    /// Worker threads for the local backend (0 = one per CPU)
    pub local_workers: usize,

    /// Worker command for the process backend (default: this binary's `handler`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_command: Option<String>,

    /// Arguments for the process backend command
    #[serde(default)]
    pub process_args: Vec<String>,
}

/// Partitioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionerSettings {
    /// Byte cap for one storage partition
    pub max_partition_bytes: u64,
}

/// Packaging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerSettings {
    /// Largest accepted task payload in bytes
    pub max_payload_bytes: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 50,
            max_retries: 3,
            poll_initial_interval_ms: 50,
            poll_max_interval_ms: 2000,
            running_grace_ms: 1000,
            task_timeout_secs: None,
            job_timeout_secs: None,
            partial_results: false,
            memory_mb: None,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            local_workers: 0, // One per CPU
            process_command: None,
            process_args: vec![],
        }
    }
}

impl Default for PartitionerSettings {
    fn default() -> Self {
        Self {
            max_partition_bytes: DEFAULT_MAX_PARTITION_BYTES,
        }
    }
}

impl Default for PackagerSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl FanoutConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => {
                let config = Self::from_file(&path)?;
                info!(path = %path.display(), "Configuration loaded from file");
                config
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            return if path.exists() {
                Ok(Some(path))
            } else {
                Err(Error::config_not_found(path))
            };
        }

        let search_paths = [
            PathBuf::from("fanout.toml"),
            dirs::config_dir()
                .map(|p| p.join("fanout").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".fanout").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Executor settings
        if let Some(n) = env_parse("FANOUT_MAX_IN_FLIGHT") {
            self.executor.max_in_flight = n;
        }
        if let Some(n) = env_parse("FANOUT_MAX_RETRIES") {
            self.executor.max_retries = n;
        }
        if let Some(n) = env_parse("FANOUT_TASK_TIMEOUT_SECS") {
            self.executor.task_timeout_secs = Some(n);
        }
        if let Some(n) = env_parse("FANOUT_JOB_TIMEOUT_SECS") {
            self.executor.job_timeout_secs = Some(n);
        }
        if let Some(flag) = env_flag("FANOUT_PARTIAL_RESULTS") {
            self.executor.partial_results = flag;
        }

        // Backend settings
        if let Ok(val) = std::env::var("FANOUT_BACKEND") {
            self.backend.kind = val;
        }
        if let Some(n) = env_parse("FANOUT_LOCAL_WORKERS") {
            self.backend.local_workers = n;
        }
        if let Ok(val) = std::env::var("FANOUT_PROCESS_COMMAND") {
            self.backend.process_command = Some(val);
        }

        // Limits
        if let Some(n) = env_parse("FANOUT_MAX_PARTITION_BYTES") {
            self.partitioner.max_partition_bytes = n;
        }
        if let Some(n) = env_parse("FANOUT_MAX_PAYLOAD_BYTES") {
            self.packager.max_payload_bytes = n;
        }

        // Logging settings
        if let Ok(val) = std::env::var("FANOUT_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("FANOUT_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(flag) = env_flag("FANOUT_LOG_JSON") {
            self.logging.json_format = flag;
        }
    }

    /// Expand ~ and environment variables in paths
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        if let Some(ref command) = self.backend.process_command {
            self.backend.process_command = Some(expand_path(command));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.executor.max_in_flight == 0 {
            return Err(Error::config_field_invalid(
                "executor.max_in_flight",
                "max_in_flight must be greater than 0",
            ));
        }
        if self.executor.poll_initial_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "executor.poll_initial_interval_ms",
                "poll_initial_interval_ms must be greater than 0",
            ));
        }
        if self.executor.poll_max_interval_ms < self.executor.poll_initial_interval_ms {
            return Err(Error::config_field_invalid(
                "executor.poll_max_interval_ms",
                "poll_max_interval_ms must not be below poll_initial_interval_ms",
            ));
        }
        if self.executor.task_timeout_secs == Some(0) || self.executor.job_timeout_secs == Some(0) {
            return Err(Error::config_field_invalid(
                "executor",
                "timeouts must be greater than 0 when set",
            ));
        }

        if BackendType::from_str(&self.backend.kind).is_none() {
            return Err(Error::config_field_invalid(
                "backend.kind",
                format!(
                    "Invalid backend '{}'. Must be one of: {}",
                    self.backend.kind,
                    BackendType::all()
                        .iter()
                        .map(BackendType::name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }

        if self.partitioner.max_partition_bytes == 0 {
            return Err(Error::config_field_invalid(
                "partitioner.max_partition_bytes",
                "max_partition_bytes must be greater than 0",
            ));
        }
        if self.packager.max_payload_bytes == 0 {
            return Err(Error::config_field_invalid(
                "packager.max_payload_bytes",
                "max_payload_bytes must be greater than 0",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Executor configuration derived from these settings
    pub fn to_executor_config(&self) -> ExecutorConfig {
        let executor = &self.executor;
        ExecutorConfig {
            max_in_flight: executor.max_in_flight,
            max_retries: executor.max_retries,
            poll_initial_interval: Duration::from_millis(executor.poll_initial_interval_ms),
            poll_max_interval: Duration::from_millis(executor.poll_max_interval_ms),
            running_grace: Duration::from_millis(executor.running_grace_ms),
            task_timeout: executor.task_timeout_secs.map(Duration::from_secs),
            job_timeout: executor.job_timeout_secs.map(Duration::from_secs),
            partial_results: executor.partial_results,
            max_payload_bytes: self.packager.max_payload_bytes,
            max_partition_bytes: self.partitioner.max_partition_bytes,
            memory_mb: executor.memory_mb,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|val| val.eq_ignore_ascii_case("true") || val == "1")
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fanout")
        .join("config.toml")
}

/// Initialize a new configuration file, returning its path
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# fanout configuration

[executor]
# Activations in flight at once, shared by every job
max_in_flight = 50

# Resubmissions per task after transient faults (timeouts, lost workers)
max_retries = 3

# Status polling backoff in milliseconds
poll_initial_interval_ms = 50
poll_max_interval_ms = 2000

# Pending time after which a task counts as running on backends
# that never report it
running_grace_ms = 1000

# Execution timeout per activation in seconds
# task_timeout_secs = 300

# Deadline for collecting a job's results in seconds
# job_timeout_secs = 3600

# Run reducers even when some of their inputs failed
partial_results = false

[backend]
# Backend kind: local, process, mock
kind = "local"

# Worker threads for the local backend (0 = one per CPU)
local_workers = 0

# Worker command for the process backend (default: `fanout handler`)
# process_command = "~/bin/fanout"
# process_args = ["handler"]

[partitioner]
# Byte cap for one storage partition (64 MiB)
max_partition_bytes = 67108864

[packager]
# Largest accepted task payload in bytes (8 MiB)
max_payload_bytes = 8388608

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.fanout/logs/fanout.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = FanoutConfig::default();
        assert_eq!(config.executor.max_in_flight, 50);
        assert_eq!(config.executor.max_retries, 3);
        assert_eq!(config.backend.kind, "local");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override() {
        env::set_var("FANOUT_MAX_IN_FLIGHT", "7");
        env::set_var("FANOUT_PARTIAL_RESULTS", "1");
        env::set_var("FANOUT_JOB_TIMEOUT_SECS", "not-a-number");

        let mut config = FanoutConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.executor.max_in_flight, 7);
        assert!(config.executor.partial_results);
        assert_eq!(config.executor.job_timeout_secs, None);

        env::remove_var("FANOUT_MAX_IN_FLIGHT");
        env::remove_var("FANOUT_PARTIAL_RESULTS");
        env::remove_var("FANOUT_JOB_TIMEOUT_SECS");
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let mut config = FanoutConfig::default();
        config.executor.max_in_flight = 0;
        match config.validate() {
            Err(Error::ConfigValidation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("executor.max_in_flight"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_validation_unknown_backend() {
        let mut config = FanoutConfig::default();
        config.backend.kind = "lambda".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = FanoutConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_caps() {
        let mut config = FanoutConfig::default();
        config.partitioner.max_partition_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = FanoutConfig::default();
        config.executor.task_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(FanoutConfig::default().validate().is_ok());
    }

    #[test]
    fn test_executor_config_conversion() {
        let mut config = FanoutConfig::default();
        config.executor.task_timeout_secs = Some(30);
        config.packager.max_payload_bytes = 1024;

        let executor = config.to_executor_config();
        assert_eq!(executor.task_timeout, Some(Duration::from_secs(30)));
        assert_eq!(executor.poll_max_interval, Duration::from_secs(2));
        assert_eq!(executor.max_payload_bytes, 1024);
        assert!(executor.job_timeout.is_none());
    }

    #[test]
    fn test_path_expansion() {
        let mut config = FanoutConfig::default();
        config.logging.file = Some("~/logs/fanout.log".to_string());
        config.expand_paths();
        assert!(!config.logging.file.unwrap().contains('~'));
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = FanoutConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: FanoutConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.executor.max_in_flight, parsed.executor.max_in_flight);
        assert_eq!(config.backend.kind, parsed.backend.kind);
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: FanoutConfig = toml::from_str(&generate_default_config()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.partitioner.max_partition_bytes,
            DEFAULT_MAX_PARTITION_BYTES
        );
        assert_eq!(config.packager.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[executor]
max_in_flight = 8
task_timeout_secs = 60

[backend]
kind = "process"
process_command = "/usr/local/bin/fanout"
process_args = ["handler"]

[logging]
level = "debug"
"#;

        let config: FanoutConfig = toml::from_str(config_str).unwrap();

        assert_eq!(config.executor.max_in_flight, 8);
        assert_eq!(config.executor.task_timeout_secs, Some(60));
        assert_eq!(config.executor.max_retries, 3);
        assert_eq!(config.backend.kind, "process");
        assert_eq!(config.backend.process_args, vec!["handler"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let path_str = path.to_string_lossy().to_string();

        assert_eq!(init_config(Some(&path_str), false).unwrap(), path);
        assert!(init_config(Some(&path_str), false).is_err());
        assert!(init_config(Some(&path_str), true).is_ok());
        assert!(FanoutConfig::from_file(&path).is_ok());
    }

    #[test]
    fn test_missing_explicit_file() {
        assert!(matches!(
            FanoutConfig::load(Some("/nonexistent/fanout.toml")),
            Err(Error::ConfigNotFound { .. })
        ));
    }
}

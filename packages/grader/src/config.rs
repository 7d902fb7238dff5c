use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

pub use common::config::{TrackerConfig, WorkerConfig};

/// Limits applied before a submission reaches the worker.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatchConfig {
    /// Longest accepted source, in characters. Default: 10000.
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,
}

fn default_max_code_length() -> usize {
    10_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_code_length: default_max_code_length(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset. Default: "info".
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GraderAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GraderAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GRADER_CONFIG").unwrap_or_else(|_| "config/grader".to_string());

        let s = Config::builder()
            .set_default("worker.url", "redis://localhost:6379")?
            .set_default("worker.key_prefix", "judge")?
            .set_default("tracker.max_attempts", 3_i64)?
            .set_default("dispatch.max_code_length", 10_000_i64)?
            .set_default("logging.level", "info")?
            // Load from config/grader.toml
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., GRADER__TRACKER__MAX_ATTEMPTS)
            .add_source(Environment::with_prefix("GRADER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

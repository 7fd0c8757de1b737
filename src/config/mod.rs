pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Which streaming endpoint the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    /// `/api/generate`, flat `response` lines.
    #[default]
    Generate,
    /// `/api/chat`, nested `message.content` lines.
    Chat,
}

impl ApiMode {
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            ApiMode::Generate => "/api/generate",
            ApiMode::Chat => "/api/chat",
        }
    }
}

impl fmt::Display for ApiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiMode::Generate => write!(f, "generate"),
            ApiMode::Chat => write!(f, "chat"),
        }
    }
}

/// Model server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api: ApiMode,
    #[serde(default = "default_model")]
    pub model: String,
    /// Whole-request timeout, including the streamed body.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api: ApiMode::default(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Full URL of the configured streaming endpoint.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.api.path())
    }
}

/// Extraction thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Extracted text shorter than this many characters is treated as no content.
    #[serde(default = "default_min_fragment_chars")]
    pub min_fragment_chars: usize,
    /// Artifact-strip residue must be strictly longer than this.
    #[serde(default = "default_artifact_min_chars")]
    pub artifact_min_chars: usize,
}

fn default_min_fragment_chars() -> usize {
    1
}
fn default_artifact_min_chars() -> usize {
    15
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            min_fragment_chars: default_min_fragment_chars(),
            artifact_min_chars: default_artifact_min_chars(),
        }
    }
}

/// Stall detection schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Silence before the first stage; later stages fire at 2x and 3x.
    #[serde(default = "default_stall_warn_after_ms")]
    pub stall_warn_after_ms: u64,
    /// Accumulated characters needed for the early (second stage) recovery.
    #[serde(default = "default_min_recovery_chars")]
    pub min_recovery_chars: usize,
}

fn default_tick_interval_ms() -> u64 {
    5_000
}
fn default_stall_warn_after_ms() -> u64 {
    20_000
}
fn default_min_recovery_chars() -> usize {
    50
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            stall_warn_after_ms: default_stall_warn_after_ms(),
            min_recovery_chars: default_min_recovery_chars(),
        }
    }
}

impl LivenessConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub fn warn_after(&self) -> Duration {
        Duration::from_millis(self.stall_warn_after_ms)
    }
}

/// Feature flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load config from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed, or validated.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate config from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError`] when the YAML is malformed or a rule is violated.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

pub mod validation;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

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

/// Model remapping and Responses API selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub remap_haiku_to: Option<String>,
    #[serde(default)]
    pub remap_sonnet_to: Option<String>,
    #[serde(default)]
    pub remap_opus_to: Option<String>,
    #[serde(default)]
    pub always_use_responses_api: bool,
    #[serde(default = "default_responses_only_models")]
    pub responses_only_models: Vec<String>,
}

fn default_responses_only_models() -> Vec<String> {
    [
        "codex-mini-latest",
        "computer-use-preview",
        "gpt-5-codex",
        "gpt-5-pro",
        "gpt-5.1-codex",
        "gpt-5.1-codex-mini",
        "gpt-oss-120b",
        "gpt-oss-20b",
        "o1-pro",
        "o3-deep-research",
        "o3-pro",
        "o4-mini-deep-research",
    ]
    .iter()
    .map(|model| (*model).to_string())
    .collect()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            remap_haiku_to: None,
            remap_sonnet_to: None,
            remap_opus_to: None,
            always_use_responses_api: false,
            responses_only_models: default_responses_only_models(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub enforce_one_tool_call_per_response: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub tool_telemetry: bool,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            enforce_one_tool_call_per_response: true,
            log_level: default_log_level(),
            tool_telemetry: false,
        }
    }
}

/// Markdown trace output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default)]
    pub write_traces_to_files: bool,
    #[serde(default = "default_traces_dir")]
    pub traces_dir: PathBuf,
}

fn default_traces_dir() -> PathBuf {
    PathBuf::from(".traces")
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            write_traces_to_files: false,
            traces_dir: default_traces_dir(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub tracing: TraceConfig,
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: AppConfig = serde_yaml::from_str(&contents)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Build a configuration purely from defaults plus environment overrides.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when the overridden values are invalid.
pub fn config_from_env() -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Apply the legacy environment variables on top of a loaded config.
///
/// A remap variable set to an empty string disables that remap; an unset
/// variable leaves the file value untouched.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let remap = |value: String| if value.is_empty() { None } else { Some(value) };
    if let Some(value) = lookup("REMAP_CLAUDE_HAIKU_TO") {
        config.routing.remap_haiku_to = remap(value);
    }
    if let Some(value) = lookup("REMAP_CLAUDE_SONNET_TO") {
        config.routing.remap_sonnet_to = remap(value);
    }
    if let Some(value) = lookup("REMAP_CLAUDE_OPUS_TO") {
        config.routing.remap_opus_to = remap(value);
    }
    if let Some(value) = lookup("ALWAYS_USE_RESPONSES_API") {
        config.routing.always_use_responses_api = env_flag(&value);
    }
    if let Some(value) = lookup("ENFORCE_ONE_TOOL_CALL_PER_RESPONSE") {
        config.features.enforce_one_tool_call_per_response = env_flag(&value);
    }
    if let Some(value) = lookup("WRITE_TRACES_TO_FILES") {
        config.tracing.write_traces_to_files = env_flag(&value);
    }
}

/// Interpret an environment variable value as a boolean flag.
#[must_use]
pub fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes" | "y"
    )
}

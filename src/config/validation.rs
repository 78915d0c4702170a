use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_remaps(config)?;
    validate_responses_only_models(config)?;
    validate_log_level(config)?;
    validate_traces_dir(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_remaps(config: &AppConfig) -> Result<(), ConfigError> {
    let remaps = [
        ("routing.remap_haiku_to", &config.routing.remap_haiku_to),
        ("routing.remap_sonnet_to", &config.routing.remap_sonnet_to),
        ("routing.remap_opus_to", &config.routing.remap_opus_to),
    ];
    for (field, value) in remaps {
        if let Some(target) = value {
            if target.trim().is_empty() {
                return Err(validation_err(format!(
                    "{field} must not be blank; omit it to disable the remap"
                )));
            }
            if target.chars().any(char::is_whitespace) {
                return Err(validation_err(format!(
                    "{field} must not contain whitespace: '{target}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_responses_only_models(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for model in &config.routing.responses_only_models {
        if model.trim().is_empty() {
            return Err(validation_err(
                "routing.responses_only_models contains an empty model name",
            ));
        }
        if !seen.insert(model.as_str()) {
            return Err(validation_err(format!(
                "routing.responses_only_models lists '{model}' more than once"
            )));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "TRACE", "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED",
];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level must be one of {VALID_LOG_LEVELS:?}, got '{}'",
            config.features.log_level
        )));
    }
    Ok(())
}

fn validate_traces_dir(config: &AppConfig) -> Result<(), ConfigError> {
    if config.tracing.write_traces_to_files && config.tracing.traces_dir.as_os_str().is_empty() {
        return Err(validation_err(
            "tracing.traces_dir must be set when write_traces_to_files is enabled",
        ));
    }
    Ok(())
}

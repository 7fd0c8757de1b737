use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_decoder_config(config)?;
    validate_liveness_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if !server.base_url.starts_with("http://") && !server.base_url.starts_with("https://") {
        return Err(validation_err(
            "server.base_url must start with http:// or https://",
        ));
    }
    if server.model.trim().is_empty() {
        return Err(validation_err("server.model cannot be empty"));
    }
    if server.timeout_secs == 0 {
        return Err(validation_err("server.timeout_secs must be greater than 0"));
    }
    if server.connect_timeout_secs == 0 {
        return Err(validation_err(
            "server.connect_timeout_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_decoder_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.decoder.min_fragment_chars == 0 {
        return Err(validation_err(
            "decoder.min_fragment_chars must be at least 1",
        ));
    }
    Ok(())
}

fn validate_liveness_config(config: &AppConfig) -> Result<(), ConfigError> {
    let liveness = &config.liveness;
    if liveness.tick_interval_ms == 0 {
        return Err(validation_err(
            "liveness.tick_interval_ms must be greater than 0",
        ));
    }
    if liveness.stall_warn_after_ms < liveness.tick_interval_ms {
        return Err(validation_err(format!(
            "liveness.stall_warn_after_ms ({}) must be >= tick_interval_ms ({})",
            liveness.stall_warn_after_ms, liveness.tick_interval_ms
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn message(yaml: &str) -> String {
        match parse_config(yaml) {
            Err(ConfigError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_base_url() {
        let msg = message("server:\n  base_url: localhost:11434\n");
        assert!(msg.contains("base_url"));
    }

    #[test]
    fn rejects_blank_model() {
        let msg = message("server:\n  model: \"  \"\n");
        assert!(msg.contains("model"));
    }

    #[test]
    fn rejects_zero_timeouts() {
        assert!(message("server:\n  timeout_secs: 0\n").contains("timeout_secs"));
        assert!(message("server:\n  connect_timeout_secs: 0\n").contains("connect_timeout_secs"));
    }

    #[test]
    fn rejects_zero_min_fragment_chars() {
        assert!(message("decoder:\n  min_fragment_chars: 0\n").contains("min_fragment_chars"));
    }

    #[test]
    fn rejects_warn_shorter_than_tick() {
        let msg = message("liveness:\n  tick_interval_ms: 1000\n  stall_warn_after_ms: 500\n");
        assert!(msg.contains("stall_warn_after_ms"));
        assert!(message("liveness:\n  tick_interval_ms: 0\n").contains("tick_interval_ms"));
    }

    #[test]
    fn log_level_is_case_insensitive() {
        assert!(parse_config("features:\n  log_level: debug\n").is_ok());
        assert!(message("features:\n  log_level: verbose\n").contains("log_level"));
    }
}

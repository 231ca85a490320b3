//! Configuration validation utilities.

use regex::Regex;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    BelfryConfig, CoreConfig, JobOverride, LogOutput, LoggingConfig, RateLimitConfig, RuleOverride,
};

/// Validates the entire configuration.
pub fn validate_config(config: &BelfryConfig) -> ConfigResult<()> {
    validate_core_config(&config.core)?;

    if config.dispatch.default_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "dispatch.default_timeout_secs must be greater than 0",
        ));
    }
    if config.dispatch.trigger_queue == 0 {
        return Err(ConfigError::validation(
            "dispatch.trigger_queue must be greater than 0",
        ));
    }
    if config.scheduler.resolution_ms == 0 {
        return Err(ConfigError::validation(
            "scheduler.resolution_ms must be greater than 0",
        ));
    }

    validate_logging_config(&config.logging)?;

    for (name, ov) in &config.rules {
        validate_rule_override(name, ov)?;
    }
    for (name, ov) in &config.jobs {
        validate_job_override(name, ov)?;
    }

    Ok(())
}

fn validate_core_config(core: &CoreConfig) -> ConfigResult<()> {
    if core.nick.trim().is_empty() {
        return Err(ConfigError::validation("core.nick cannot be empty"));
    }
    if core.alias_nicks.iter().any(|alias| alias.trim().is_empty()) {
        return Err(ConfigError::validation("core.alias_nicks cannot contain empty names"));
    }
    if core.command_prefix.is_empty() {
        return Err(ConfigError::validation("core.command_prefix cannot be empty"));
    }
    Regex::new(&format!("^(?:{})", core.command_prefix))
        .map_err(|e| ConfigError::invalid_pattern("core.command_prefix", e))?;
    if core.help_prefix.is_empty() {
        return Err(ConfigError::validation("core.help_prefix cannot be empty"));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }
    Ok(())
}

fn validate_rule_override(name: &str, ov: &RuleOverride) -> ConfigResult<()> {
    if ov.timeout_secs == Some(0) {
        return Err(ConfigError::validation(format!(
            "rules.{name}.timeout_secs must be greater than 0"
        )));
    }
    for limit in ov.rate_limits.iter().flatten() {
        validate_rate_limit(name, limit)?;
    }
    Ok(())
}

fn validate_rate_limit(rule: &str, limit: &RateLimitConfig) -> ConfigResult<()> {
    if limit.limit == 0 {
        return Err(ConfigError::validation(format!(
            "rules.{rule}.rate_limits: limit must be greater than 0"
        )));
    }
    if limit.window_secs == 0 {
        return Err(ConfigError::validation(format!(
            "rules.{rule}.rate_limits: window_secs must be greater than 0"
        )));
    }
    Ok(())
}

fn validate_job_override(name: &str, ov: &JobOverride) -> ConfigResult<()> {
    if ov.interval_secs == Some(0) {
        return Err(ConfigError::validation(format!(
            "jobs.{name}.interval_secs must be greater than 0"
        )));
    }
    if ov.timeout_secs == Some(0) {
        return Err(ConfigError::validation(format!(
            "jobs.{name}.timeout_secs must be greater than 0"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use belfry_framework::RateLimitScope;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&BelfryConfig::default()).is_ok());
    }

    #[test]
    fn test_empty_nick_rejected() {
        let mut config = BelfryConfig::default();
        config.core.nick = "  ".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let mut config = BelfryConfig::default();
        config.core.command_prefix = "[".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_empty_help_prefix_rejected() {
        let mut config = BelfryConfig::default();
        config.core.help_prefix.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = BelfryConfig::default();
        config.dispatch.default_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = BelfryConfig::default();
        config.scheduler.resolution_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = BelfryConfig::default();
        config.jobs.insert(
            "tick".into(),
            JobOverride {
                interval_secs: Some(0),
                ..Default::default()
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rate_limit_window_rejected() {
        let mut config = BelfryConfig::default();
        config.rules.insert(
            "ping".into(),
            RuleOverride {
                rate_limits: Some(vec![RateLimitConfig {
                    limit: 1,
                    window_secs: 0,
                    scope: RateLimitScope::Actor,
                }]),
                ..Default::default()
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = BelfryConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("belfry.log".into());
        assert!(validate_config(&config).is_ok());
    }
}

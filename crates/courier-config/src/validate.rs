//! Post-merge configuration validation.

use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, StrategyChoice};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];
const STORE_SCHEMES: &[&str] = &["memory", "redis", "rediss"];

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_bus(config)?;
    validate_store(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_bus(config: &Config) -> ConfigResult<()> {
    let bus = &config.bus;

    if bus.offline_batch_limit == 0 {
        return Err(ConfigError::invalid(
            "bus.offline_batch_limit",
            "must be greater than 0",
        ));
    }

    if bus.consumer.is_empty() || bus.consumer.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid(
            "bus.consumer",
            "must be non-empty and contain no whitespace",
        ));
    }

    Ok(())
}

fn validate_store(config: &Config) -> ConfigResult<()> {
    let store = &config.store;

    match store.scheme() {
        Some(scheme) if STORE_SCHEMES.contains(&scheme) => {},
        _ => {
            return Err(ConfigError::invalid(
                "store.url",
                format!(
                    "unsupported store URL '{}'; expected one of: memory://, redis://, rediss://",
                    store.redacted_url()
                ),
            ));
        },
    }

    if config.bus.strategy == StrategyChoice::Remote && store.is_memory() {
        warn!(
            "remote strategy with a memory:// store; events are only shared within this process"
        );
    }

    if store.key_prefix.is_empty() || store.key_prefix.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid(
            "store.key_prefix",
            "must be non-empty and contain no whitespace",
        ));
    }

    if store.lock_ttl_secs == 0 {
        return Err(ConfigError::invalid(
            "store.lock_ttl_secs",
            "must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let logging = &config.logging;

    if !LOG_LEVELS.contains(&logging.level.as_str()) {
        return Err(ConfigError::invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected one of: {}",
                logging.level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }

    if !LOG_FORMATS.contains(&logging.format.as_str()) {
        return Err(ConfigError::invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: {}",
                logging.format,
                LOG_FORMATS.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_batch_limit() {
        let mut config = Config::default();
        config.bus.offline_batch_limit = 0;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "bus.offline_batch_limit"
        );
    }

    #[test]
    fn test_consumer_with_whitespace() {
        let mut config = Config::default();
        config.bus.consumer = "worker one".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "bus.consumer");
    }

    #[test]
    fn test_unknown_store_scheme() {
        let mut config = Config::default();
        config.store.url = "postgres://db".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "store.url");

        config.store.url = "cache:6379".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "store.url");
    }

    #[test]
    fn test_remote_with_memory_store_is_allowed() {
        let mut config = Config::default();
        config.bus.strategy = StrategyChoice::Remote;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_prefix() {
        let mut config = Config::default();
        config.store.key_prefix = String::new();
        assert_eq!(field_of(validate(&config).unwrap_err()), "store.key_prefix");
    }

    #[test]
    fn test_zero_lock_ttl() {
        let mut config = Config::default();
        config.store.lock_ttl_secs = 0;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "store.lock_ttl_secs"
        );
    }

    #[test]
    fn test_bad_logging() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.level");

        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.format");
    }
}

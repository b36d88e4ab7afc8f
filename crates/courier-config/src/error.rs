//! Configuration errors.

use std::io;

use thiserror::Error;

/// Why a configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read, or an explicit file is
    /// missing.
    #[error("cannot read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// I/O failure.
        #[source]
        source: io::Error,
    },

    /// A config file is not valid TOML, or has a wrongly typed value.
    #[error("cannot parse {path}: {source}")]
    ParseError {
        /// File path, or `<embedded defaults>`.
        path: String,
        /// TOML error with line and column.
        #[source]
        source: toml::de::Error,
    },

    /// The merged configuration is well-formed but unusable.
    #[error("invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path, e.g. `bus.consumer`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// No home directory to look for `~/.courier/config.toml` in.
    #[error("cannot determine the home directory")]
    NoHomeDir,
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_owned(),
            message: message.into(),
        }
    }
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

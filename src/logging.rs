//! Tracing subscriber setup for the `ballast` binary.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Errors raised while installing the subscriber.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum LoggingError {
    /// Raised when the fallback level is not a valid filter directive.
    #[error("invalid log level {level:?}: {message}")]
    InvalidLevel {
        /// Configured level.
        level: String,
        /// Parser message.
        message: String,
    },
    /// Raised when a global subscriber is already installed.
    #[error("logging already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Builds the filter: `RUST_LOG` when set, otherwise `level`.
///
/// # Errors
///
/// Returns [`LoggingError::InvalidLevel`] when `RUST_LOG` is unset and
/// `level` does not parse.
pub fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(level).map_err(|err| LoggingError::InvalidLevel {
            level: level.to_owned(),
            message: err.to_string(),
        })
    })
}

/// Installs a global subscriber writing to stderr, as JSON when `json` is
/// set.
///
/// # Errors
///
/// Returns [`LoggingError`] when the level is invalid or a subscriber is
/// already installed.
pub fn init(level: &str, json: bool) -> Result<(), LoggingError> {
    let filter = env_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|err| LoggingError::AlreadyInitialised(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_level() {
        // Only meaningful when RUST_LOG is not set for the test process.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = env_filter("ballast=loud").expect_err("bad directive");
        assert!(matches!(err, LoggingError::InvalidLevel { .. }));
    }

    #[test]
    fn accepts_plain_level() {
        assert!(env_filter("info").is_ok());
    }
}

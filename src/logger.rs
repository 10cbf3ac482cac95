//! Tracing subscriber setup for the `convo` binary and embedding hosts.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! host's call.  [`init`] may run twice (bootstrap level, then configured
//! level); the second call reports "already set" and the first one wins.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Install the global subscriber, writing to stderr.
///
/// With `prefer_level` the given `level` wins and `RUST_LOG` is only consulted
/// when `level` does not parse.  Without it, `RUST_LOG` wins and `level` is
/// the fallback.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let filter = if prefer_level {
        EnvFilter::try_new(level).or_else(|level_err| {
            EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })
        })?
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

/// Validate a configured level before it is handed to [`init`].
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.trim().is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_levels_parse() {
        for l in ["error", "warn", "info", "debug", "trace", " info "] {
            assert!(parse_level(l).is_ok(), "expected '{l}' to be valid");
        }
    }

    #[test]
    fn bogus_levels_rejected() {
        assert!(parse_level("chatty").is_err());
        assert!(parse_level("").is_err());
        assert!(parse_level("   ").is_err());
    }

    #[test]
    fn init_twice_reports_already_set() {
        // Another test in this process may have installed a subscriber first.
        let _ = init("info", true);
        match init("debug", true) {
            Err(AppError::Logger(msg)) => assert!(msg.contains("set subscriber")),
            other => panic!("expected second init to fail, got {other:?}"),
        }
    }
}

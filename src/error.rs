//! Application-wide error types.
//!
//! [`AppError`] covers process startup (config, logger).  [`ChatError`] is the
//! taxonomy returned by the host-facing operations of
//! [`ConversationManager`](crate::manager::ConversationManager).  Provider
//! failures never appear here: they are absorbed by fallback degradation.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to hosts by the conversation operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Message text was empty or whitespace-only.  No side effects happened.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A runtime bundle failed to build.
///
/// `Clone` because a single failed build is reported to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error)]
#[error("runtime construction failed for {key}: {reason}")]
pub struct ConstructionError {
    /// Fingerprint of the cache key whose build failed.
    pub key: String,
    pub reason: String,
}

impl ConstructionError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { key: key.into(), reason: reason.into() }
    }
}

/// Message history persistence failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed history file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage task failed: {0}")]
    Join(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

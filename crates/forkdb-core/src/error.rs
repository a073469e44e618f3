// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for forkdb.
//!
//! Errors fall into four families: engine failures (a domain error reported by
//! the database engine, never fatal to a channel), channel failures (a torn or
//! dead pipe to a worker process, recovered by respawn on the next acquire),
//! resource exhaustion, and cancellation.

use std::time::Duration;

use strum::{Display, EnumString};
use thiserror::Error;

use crate::types::WorkerId;

/// The primary error type used across forkdb crates.
#[derive(Debug, Error)]
pub enum ForkDbError {
    /// The engine rejected the operation (bad statement, constraint violation, ...).
    #[error("engine error: {message}")]
    Engine { message: String },

    /// The pipe pair to a worker process failed mid-exchange.
    #[error("channel error on worker {worker}: {message}")]
    Channel {
        worker: WorkerId,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every handle slot is in use; there is nothing to evict.
    #[error("handle cache exhausted: all {capacity} slots are in use")]
    CacheExhausted { capacity: usize },

    /// The worker was asked to abort and the session observed it.
    #[error("operation cancelled on worker {worker}")]
    Cancelled { worker: WorkerId },

    /// A worker did not answer within the configured request timeout.
    #[error("worker {worker} did not respond within {duration:?}")]
    Timeout { worker: WorkerId, duration: Duration },

    /// A remote session index no longer refers to an open session.
    #[error("invalid session index {index} on worker {worker}")]
    InvalidSession { worker: WorkerId, index: i32 },

    /// Configuration errors (invalid values, inconsistent sizes).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ForkDbError`], suitable for host runtimes
/// that only need to decide between "report", "retry" and "back off".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Engine,
    Channel,
    Exhausted,
    Cancelled,
    Timeout,
    InvalidSession,
    Config,
    Internal,
}

impl ForkDbError {
    /// Builds a channel error from an I/O failure.
    pub fn channel(worker: WorkerId, err: std::io::Error) -> Self {
        ForkDbError::Channel {
            worker,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Builds an engine error from a message.
    pub fn engine(message: impl Into<String>) -> Self {
        ForkDbError::Engine {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ForkDbError::Engine { .. } => ErrorKind::Engine,
            ForkDbError::Channel { .. } => ErrorKind::Channel,
            ForkDbError::CacheExhausted { .. } => ErrorKind::Exhausted,
            ForkDbError::Cancelled { .. } => ErrorKind::Cancelled,
            ForkDbError::Timeout { .. } => ErrorKind::Timeout,
            ForkDbError::InvalidSession { .. } => ErrorKind::InvalidSession,
            ForkDbError::Config(_) => ErrorKind::Config,
            ForkDbError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same operation may succeed without caller changes.
    ///
    /// Channel, timeout and stale-session failures are resolved by the lazy
    /// respawn performed on the next acquire.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Channel | ErrorKind::Timeout | ErrorKind::InvalidSession
        )
    }
}

/// Failure reported by an engine session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine reported a domain failure.
    #[error("{0}")]
    Failed(String),

    /// The call was aborted because the session's interrupt was raised.
    #[error("interrupted")]
    Interrupted,
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        EngineError::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        let io = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(ForkDbError::channel(3, io).is_retryable());
        assert!(
            ForkDbError::Timeout {
                worker: 1,
                duration: Duration::from_millis(5)
            }
            .is_retryable()
        );
        assert!(!ForkDbError::engine("syntax error").is_retryable());
        assert!(!ForkDbError::CacheExhausted { capacity: 4 }.is_retryable());
        assert!(!ForkDbError::Cancelled { worker: 2 }.is_retryable());
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::InvalidSession.to_string(), "invalid_session");
        assert_eq!(
            "exhausted".parse::<ErrorKind>().expect("should parse"),
            ErrorKind::Exhausted
        );
    }

    #[test]
    fn engine_error_message_is_preserved() {
        let err = ForkDbError::engine("no such table: T");
        assert_eq!(err.to_string(), "engine error: no such table: T");
        assert_eq!(err.kind(), ErrorKind::Engine);
    }
}

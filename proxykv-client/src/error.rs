//! # Error Taxonomy
//!
//! Purpose: Give every failure of the client a typed kind so retry and
//! propagation decisions are made by matching, not by string inspection.
//!
//! ## Design Principles
//! 1. **Closed Taxonomy**: Every error maps onto exactly one `ErrorKind`.
//! 2. **Retry by Type**: Only transport-level failures are retryable.
//! 3. **No Fake Successes**: Errors are always surfaced, never coerced into
//!    `false`, `0` or `None`.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for the cache client.
pub type CacheResult<T> = Result<T, CacheError>;

/// Coarse classification of a `CacheError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid pool bounds, retry parameters or configuration values.
    Configuration,
    /// Coordination service unreachable or no live proxy registered.
    DiscoveryUnavailable,
    /// No connection became available before the acquire deadline.
    PoolExhausted,
    /// Network or framing failure while talking to a backend.
    TransientStore,
    /// The store rejected the command, or replied with an unexpected shape.
    StoreCommand,
}

/// Errors surfaced by the cache client.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("backend discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("io error talking to {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("protocol error from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: &'static str },

    #[error("store rejected command: {message}")]
    StoreCommand { message: String },

    #[error("unexpected reply to {command}")]
    UnexpectedReply { command: String },
}

impl CacheError {
    /// Builds a configuration error from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        CacheError::Configuration(message.into())
    }

    /// Builds a discovery error from any displayable message.
    pub fn discovery(message: impl Into<String>) -> Self {
        CacheError::DiscoveryUnavailable(message.into())
    }

    pub(crate) fn io(endpoint: impl ToString, source: io::Error) -> Self {
        CacheError::Io {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    pub(crate) fn protocol(endpoint: impl ToString, reason: &'static str) -> Self {
        CacheError::Protocol {
            endpoint: endpoint.to_string(),
            reason,
        }
    }

    pub(crate) fn unexpected(command: &[u8]) -> Self {
        CacheError::UnexpectedReply {
            command: String::from_utf8_lossy(command).into_owned(),
        }
    }

    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Configuration(_) => ErrorKind::Configuration,
            CacheError::DiscoveryUnavailable(_) => ErrorKind::DiscoveryUnavailable,
            CacheError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            CacheError::Io { .. } | CacheError::Protocol { .. } => ErrorKind::TransientStore,
            CacheError::StoreCommand { .. } | CacheError::UnexpectedReply { .. } => {
                ErrorKind::StoreCommand
            }
        }
    }

    /// Returns true when another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStore
    }

    /// Returns true when the connection that produced this error must not be
    /// reused.
    pub(crate) fn poisons_connection(&self) -> bool {
        self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_kinds() {
        let io = CacheError::io("127.0.0.1:1", io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(io.kind(), ErrorKind::TransientStore);
        assert!(io.is_retryable());

        let rejected = CacheError::StoreCommand {
            message: "WRONGTYPE".into(),
        };
        assert_eq!(rejected.kind(), ErrorKind::StoreCommand);
        assert!(!rejected.is_retryable());

        assert!(!CacheError::config("bad").is_retryable());
        assert!(!CacheError::discovery("down").is_retryable());
        assert!(!CacheError::PoolExhausted {
            waited: Duration::from_millis(5)
        }
        .is_retryable());
    }

    #[test]
    fn only_transport_errors_poison_connections() {
        assert!(CacheError::protocol("h:1", "bad frame").poisons_connection());
        assert!(!CacheError::unexpected(b"GET").poisons_connection());
    }
}

//! Error types for the invalidation engine.

use std::fmt;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the token store, the key generator and configuration.
///
/// Only [`Error::StoreConnectivity`] is considered transient: the token store
/// retries it and then degrades (fail-open reads, swallowed writes). Every other
/// variant is returned to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The backing store could not be reached (refused, dropped, timed out, pool exhausted).
    StoreConnectivity(String),

    /// The backing store answered, but with an error (wrong type, script error, ...).
    BackendError(String),

    /// A cache key fragment could not be resolved to a token or literal.
    UnsupportedFragmentKind(String),

    /// A string or a part of an identifier is not a valid identifier.
    InvalidIdentifier(String),

    /// Connection configuration is missing or malformed.
    ConfigError(String),

    /// A structured literal could not be coerced into its canonical form.
    SerializationError(String),
}

impl Error {
    /// Whether this error is a transient connectivity failure worth retrying.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::StoreConnectivity(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StoreConnectivity(msg) => write!(f, "Store connectivity error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::UnsupportedFragmentKind(msg) => {
                write!(f, "Unsupported cache key fragment: {}", msg)
            }
            Error::InvalidIdentifier(msg) => write!(f, "Invalid identifier: {}", msg),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
        {
            Error::StoreConnectivity(e.to_string())
        } else {
            Error::BackendError(e.to_string())
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Error::StoreConnectivity(format!("Failed to get Redis connection: {}", e))
    }
}

//! Error types and error support code.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Boxed error produced by a connection factory or by caller code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used throughout the pool.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Generalized error type used by the connection pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No connection became available within the wait budget.
    #[error("pool `{pool}` exhausted: unable to fetch a connection in {waited:?}, none available [{in_use} in use]")]
    AcquireTimeout {
        /// Pool name.
        pool: String,
        /// Time spent waiting.
        waited: Duration,
        /// Number of busy connections at the time of failure.
        in_use: usize,
    },
    /// Call would block the thread, and non-blocking operation was requested.
    #[error("acquisition from pool would block execution")]
    WouldBlock,
    /// A new physical connection could not be established.
    #[error("unable to establish a new connection: {0}")]
    Connect(#[from] ConnectError),
    /// Pool has been closed and no longer lends connections.
    #[error("connection pool is closed")]
    PoolClosed,
    /// Connection was already returned, discarded or reclaimed.
    #[error("connection has already been closed or reclaimed by the pool")]
    ResourceClosed,
    /// An interceptor refused to pass the call down the chain.
    #[error("call rejected by interceptor `{interceptor}`: {reason}")]
    Rejected {
        /// Name of the rejecting interceptor.
        interceptor: String,
        /// Reason supplied by the interceptor.
        reason: String,
    },
    /// Caller-supplied operation on the physical connection failed.
    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),
    /// Pool configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Background task running a borrow did not complete.
    #[cfg(feature = "tokio")]
    #[error("borrow task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the caller may reasonably retry the failed borrow later.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. } | Self::WouldBlock)
    }

    /// Whether this error originated from the connection factory.
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

/// Failure to produce a usable physical connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// Factory refused to open a connection.
    #[error("{0}")]
    Factory(#[source] BoxError),
    /// Connection initialization statement failed.
    #[error("init SQL failed: {0}")]
    InitSql(#[source] BoxError),
    /// Newly established connection did not pass validation.
    #[error("failed to validate a newly established connection")]
    Validation,
}

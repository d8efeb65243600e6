//! Physical connection factory capability.

use crate::config::{ConnectionProperties, SessionDefaults};

/// Source of physical connections for a pool.
///
/// The pool never inspects connections itself: it only creates, validates, resets and destroys
/// them through this trait.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Physical connection type produced by this factory.
    type Connection: Send + 'static;
    /// Error type used by the factory.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new physical connection.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the connection could not be established.
    fn create(&self, props: &ConnectionProperties) -> Result<Self::Connection, Self::Error>;

    /// Check whether the connection is still usable.
    ///
    /// `query` is the configured validation query, if any.
    fn validate(&self, conn: &mut Self::Connection, query: Option<&str>) -> bool;

    /// Execute a statement on the connection, discarding any result.
    ///
    /// Used to run the connection initialization statement.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the statement failed.
    fn execute(&self, _conn: &mut Self::Connection, _sql: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Bring the session of a returned connection back to a clean state.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the session could not be reset. The pool discards the connection then.
    fn reset_session(
        &self,
        _conn: &mut Self::Connection,
        _reset: &SessionReset<'_>,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Close the physical connection.
    ///
    /// # Errors
    ///
    /// Returns `Err` if closing failed. The connection is considered gone either way.
    fn destroy(&self, conn: Self::Connection) -> Result<(), Self::Error>;
}

/// Session reset requested when a connection goes back into the pool.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct SessionReset<'a> {
    /// Commit pending work.
    pub commit: bool,
    /// Roll back pending work.
    pub rollback: bool,
    /// Restore these session defaults.
    pub restore: Option<&'a SessionDefaults>,
}

impl SessionReset<'_> {
    /// Whether there is nothing to do.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.commit && !self.rollback && self.restore.is_none()
    }
}

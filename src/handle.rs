//! Borrowed connection handle.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{MappedMutexGuard, MutexGuard};

use crate::{
    error::{BoxError, Error, Result},
    factory::ConnectionFactory,
    interceptor::{Operation, Outcome},
    pool::ConnectionPool,
    resource::{PooledResource, ResourceState},
};

/// Connection borrowed from a [`ConnectionPool`].
///
/// Goes back to the pool when dropped or [closed](Self::close). A handle whose connection was
/// reclaimed by the pool in the meantime fails every call with [`Error::ResourceClosed`].
pub struct PooledConnection<F: ConnectionFactory> {
    pool: ConnectionPool<F>,
    resource: Arc<PooledResource<F::Connection>>,
    /// Loan this handle was issued.
    lease: u64,
    /// Borrow time.
    borrowed_at: Instant,
    released: bool,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    pub(crate) fn new(
        pool: ConnectionPool<F>,
        resource: Arc<PooledResource<F::Connection>>,
        lease: u64,
        borrowed_at: Instant,
    ) -> Self {
        Self {
            pool,
            resource,
            lease,
            borrowed_at,
            released: false,
        }
    }

    /// Pool-unique identifier of the underlying resource.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.resource.id()
    }

    /// Time since the connection was borrowed.
    #[must_use]
    pub fn borrowed_for(&self) -> Duration {
        self.borrowed_at.elapsed()
    }

    /// Whether this handle no longer owns its connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.released || !self.resource.state.lock().is_leased_to(self.lease)
    }

    fn state(&mut self) -> Result<MutexGuard<'_, ResourceState<F::Connection>>> {
        if self.released {
            return Err(Error::ResourceClosed);
        }
        let state = self.resource.state.lock();
        if !state.is_leased_to(self.lease) || self.resource.info.is_discarded() {
            return Err(Error::ResourceClosed);
        }
        Ok(state)
    }

    /// Run an operation on the connection through the interceptor chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceClosed`] if the connection is gone, [`Error::Rejected`] if an
    /// interceptor stopped the call, or [`Error::Operation`] if `f` failed.
    pub fn execute<T, E, Op>(&mut self, op: Operation<'_>, f: Op) -> Result<T>
    where
        Op: FnOnce(&mut F::Connection) -> Result<T, E>,
        E: Into<BoxError>,
    {
        match self.intercept(&op, f)? {
            Some(value) => Ok(value),
            None => Err(Error::Rejected {
                interceptor: String::from("chain"),
                reason: format!("{} was not passed to the connection", op.name()),
            }),
        }
    }

    /// Apply a session setting through the interceptor chain.
    ///
    /// Unlike [`Self::execute`], an interceptor may answer the call without reaching the
    /// connection, for example when the setting already has the requested value.
    ///
    /// # Errors
    ///
    /// Same as [`Self::execute`].
    pub fn set<E, Op>(&mut self, op: Operation<'_>, f: Op) -> Result<()>
    where
        Op: FnOnce(&mut F::Connection) -> Result<(), E>,
        E: Into<BoxError>,
    {
        self.intercept(&op, f).map(|_| ())
    }

    /// Pass a call down the chain. [`None`] means the chain completed it without calling `f`.
    fn intercept<T, E, Op>(&mut self, op: &Operation<'_>, f: Op) -> Result<Option<T>>
    where
        Op: FnOnce(&mut F::Connection) -> Result<T, E>,
        E: Into<BoxError>,
    {
        let mut state = self.state()?;
        let ResourceState { conn, chain, .. } = &mut *state;
        let conn = conn.as_mut().ok_or(Error::ResourceClosed)?;
        let mut call = Some(f);
        let mut result = None;
        let outcome = chain.invoke(op, &mut |_| {
            let Some(call) = call.take() else {
                return Outcome::Failed("call already made".into());
            };
            let res = call(conn).map_err(Into::into);
            let outcome = match &res {
                Ok(_) => Outcome::Completed,
                Err(err) => Outcome::Failed(err.to_string()),
            };
            result = Some(res);
            outcome
        });
        match (result, outcome) {
            (Some(Ok(value)), _) => Ok(Some(value)),
            (Some(Err(err)), _) => Err(Error::Operation(err)),
            (None, Outcome::Rejected { interceptor, reason }) => {
                Err(Error::Rejected { interceptor, reason })
            }
            (None, Outcome::Failed(reason)) => Err(Error::Operation(reason.into())),
            (None, Outcome::Completed) => Ok(None),
        }
    }

    /// Run a closure on the connection, bypassing interceptors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceClosed`] if the connection is gone.
    pub fn with<R>(&mut self, f: impl FnOnce(&mut F::Connection) -> R) -> Result<R> {
        let mut state = self.state()?;
        let conn = state.conn.as_mut().ok_or(Error::ResourceClosed)?;
        Ok(f(conn))
    }

    /// Lock the connection for direct access.
    ///
    /// The sweeper leaves a locked connection alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceClosed`] if the connection is gone.
    pub fn lock(&mut self) -> Result<MappedMutexGuard<'_, F::Connection>> {
        let state = self.state()?;
        MutexGuard::try_map(state, |s| s.conn.as_mut()).map_err(|_| Error::ResourceClosed)
    }

    /// Return the connection to the pool.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let shared = self.pool.shared();
        shared.give_back(&self.resource, self.lease);
        let (metrics, label) = shared.metrics();
        metrics
            .use_time
            .record(self.borrowed_at.elapsed().as_secs_f64(), label);
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name())
            .field("id", &self.id())
            .field("lease", &self.lease)
            .field("borrowed_for", &self.borrowed_for())
            .finish()
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        self.release();
    }
}

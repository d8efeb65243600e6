//! Pooled resource wrapping a single physical connection.

use std::{
    backtrace::Backtrace,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::warn;

use crate::{config::PoolConfig, factory::ConnectionFactory, interceptor::InterceptorChain};

/// Metadata of a pooled resource, shared with interceptors.
///
/// Timestamps are kept as offsets from the creation instant, so they can be updated without
/// taking the resource lock.
#[derive(Debug)]
pub struct ResourceInfo {
    id: u64,
    created_at: Instant,
    /// Nanoseconds after creation of the last borrow, return or activity.
    touched: AtomicU64,
    /// Nanoseconds after creation of the last successful validation, plus one. Zero is never.
    validated: AtomicU64,
    discarded: AtomicBool,
}

impl ResourceInfo {
    pub(crate) fn new(id: u64, created_at: Instant) -> Self {
        Self {
            id,
            created_at,
            touched: AtomicU64::new(0),
            validated: AtomicU64::new(0),
            discarded: AtomicBool::new(false),
        }
    }

    fn offset(&self, at: Instant) -> u64 {
        u64::try_from(at.saturating_duration_since(self.created_at).as_nanos()).unwrap_or(u64::MAX)
    }

    /// Pool-unique identifier of the resource.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the physical connection was established.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the physical connection was established.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Mark the resource as active right now.
    pub fn touch(&self) {
        self.touched
            .fetch_max(self.offset(Instant::now()), Ordering::Relaxed);
    }

    /// When the resource was last borrowed, returned or used.
    #[must_use]
    pub fn last_touched(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.touched.load(Ordering::Relaxed))
    }

    /// Time since the resource was last borrowed, returned or used.
    #[must_use]
    pub fn since_touched(&self) -> Duration {
        self.last_touched().elapsed()
    }

    /// Time since the last successful validation, [`None`] if never validated.
    #[must_use]
    pub fn since_validated(&self) -> Option<Duration> {
        match self.validated.load(Ordering::Relaxed) {
            0 => None,
            offset => Some((self.created_at + Duration::from_nanos(offset - 1)).elapsed()),
        }
    }

    fn mark_validated(&self, at: Instant) {
        self.validated
            .store(self.offset(at).saturating_add(1), Ordering::Relaxed);
    }

    /// Whether the resource has been discarded. Discarded resources are never lent again.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    /// Set the discarded flag, returning `true` only for the first caller.
    fn mark_discarded(&self) -> bool {
        !self.discarded.swap(true, Ordering::AcqRel)
    }
}

/// Occasion on which a resource is validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ValidationKind {
    /// Right after creation.
    Connect,
    /// Before being lent.
    Borrow,
    /// When given back.
    Return,
    /// While sitting idle.
    Idle,
}

/// Outcome of a validation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Validation {
    Valid,
    Invalid,
    /// Not required by policy, or validated recently enough.
    Skipped,
}

/// Mutable state of a pooled resource, guarded by its lock.
pub(crate) struct ResourceState<C> {
    /// Physical connection, [`None`] once discarded.
    pub(crate) conn: Option<C>,
    /// Loan counter, bumped on every borrow.
    pub(crate) lease: u64,
    /// Start of the current loan, [`None`] while not lent.
    pub(crate) borrowed_at: Option<Instant>,
    /// Call trace of the current borrower.
    pub(crate) trace: Option<Backtrace>,
    pub(crate) suspect_reported: bool,
    pub(crate) chain: InterceptorChain,
}

impl<C> ResourceState<C> {
    /// Whether a handle with the given lease still owns the resource.
    pub(crate) fn is_leased_to(&self, lease: u64) -> bool {
        self.conn.is_some() && self.borrowed_at.is_some() && self.lease == lease
    }

    /// Validate the connection on the given occasion.
    pub(crate) fn validate<F>(
        &mut self,
        info: &ResourceInfo,
        factory: &F,
        config: &PoolConfig,
        kind: ValidationKind,
    ) -> Validation
    where
        F: ConnectionFactory<Connection = C>,
    {
        if info.is_discarded() {
            return Validation::Invalid;
        }
        let required = match kind {
            ValidationKind::Connect => config.test_on_connect,
            ValidationKind::Borrow => config.test_on_borrow,
            ValidationKind::Return => config.test_on_return,
            ValidationKind::Idle => config.test_while_idle,
        };
        if !required {
            return Validation::Skipped;
        }
        if kind != ValidationKind::Connect && !config.validation_interval.is_zero() {
            if let Some(since) = info.since_validated() {
                if since < config.validation_interval {
                    return Validation::Skipped;
                }
            }
        }
        let Some(conn) = self.conn.as_mut() else {
            return Validation::Invalid;
        };
        let now = Instant::now();
        if factory.validate(conn, config.validation_query.as_deref()) {
            info.mark_validated(now);
            Validation::Valid
        } else {
            warn!(
                pool = %config.name,
                resource = info.id(),
                age = ?info.age(),
                occasion = ?kind,
                "connection failed validation"
            );
            Validation::Invalid
        }
    }
}

/// Resource owned by the pool: physical connection plus bookkeeping.
pub(crate) struct PooledResource<C> {
    pub(crate) info: Arc<ResourceInfo>,
    pub(crate) state: Mutex<ResourceState<C>>,
}

impl<C> PooledResource<C> {
    pub(crate) fn new(id: u64, created_at: Instant, conn: C, chain: InterceptorChain) -> Self {
        Self {
            info: Arc::new(ResourceInfo::new(id, created_at)),
            state: Mutex::new(ResourceState {
                conn: Some(conn),
                lease: 0,
                borrowed_at: None,
                trace: None,
                suspect_reported: false,
                chain,
            }),
        }
    }

    /// Pool-unique identifier.
    pub(crate) fn id(&self) -> u64 {
        self.info.id
    }

    /// Mark the resource discarded and take its connection out.
    ///
    /// Returns the connection only to the first caller, so that it is destroyed exactly once.
    pub(crate) fn discard(&self, state: &mut ResourceState<C>) -> Option<C> {
        if !self.info.mark_discarded() {
            return None;
        }
        state.borrowed_at = None;
        state.trace = None;
        state.chain.unbind();
        state.conn.take()
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, thread};

    use super::*;

    struct Checker {
        valid: bool,
    }

    impl ConnectionFactory for Checker {
        type Connection = u32;
        type Error = Infallible;

        fn create(&self, _props: &crate::config::ConnectionProperties) -> Result<u32, Infallible> {
            Ok(0)
        }

        fn validate(&self, conn: &mut u32, _query: Option<&str>) -> bool {
            *conn += 1;
            self.valid
        }

        fn destroy(&self, _conn: u32) -> Result<(), Infallible> {
            Ok(())
        }
    }

    fn resource() -> PooledResource<u32> {
        PooledResource::new(7, Instant::now(), 0, InterceptorChain::default())
    }

    #[test]
    fn discard_is_idempotent() {
        let res = resource();
        let mut state = res.state.lock();
        assert_eq!(res.discard(&mut state), Some(0));
        assert_eq!(res.discard(&mut state), None);
        assert!(res.info.is_discarded());
        assert!(!state.is_leased_to(0));
    }

    #[test]
    fn touch_moves_forward() {
        let res = resource();
        let first = res.info.last_touched();
        thread::sleep(Duration::from_millis(5));
        res.info.touch();
        assert!(res.info.last_touched() > first);
        assert!(res.info.since_touched() < Duration::from_millis(5));
    }

    #[test]
    fn validation_policy() {
        let res = resource();
        let mut config = PoolConfig::default();
        let factory = Checker { valid: true };
        let mut state = res.state.lock();

        assert_eq!(
            state.validate(&res.info, &factory, &config, ValidationKind::Borrow),
            Validation::Skipped
        );
        config.test_on_borrow = true;
        config.validation_interval = Duration::from_secs(60);
        assert_eq!(
            state.validate(&res.info, &factory, &config, ValidationKind::Borrow),
            Validation::Valid
        );
        assert!(res.info.since_validated().is_some());
        // Within the interval.
        assert_eq!(
            state.validate(&res.info, &factory, &config, ValidationKind::Borrow),
            Validation::Skipped
        );
        assert_eq!(state.conn, Some(1));

        config.test_on_connect = true;
        assert_eq!(
            state.validate(&res.info, &factory, &config, ValidationKind::Connect),
            Validation::Valid
        );
        assert_eq!(state.conn, Some(2));
    }

    #[test]
    fn failed_and_discarded_are_invalid() {
        let res = resource();
        let mut config = PoolConfig::default();
        config.test_on_return = true;
        let mut state = res.state.lock();
        let failing = Checker { valid: false };
        assert_eq!(
            state.validate(&res.info, &failing, &config, ValidationKind::Return),
            Validation::Invalid
        );
        res.discard(&mut state);
        let passing = Checker { valid: true };
        assert_eq!(
            state.validate(&res.info, &passing, &config, ValidationKind::Return),
            Validation::Invalid
        );
    }
}

//! Connection pool orchestrating borrow, return, reclaim and eviction.

use std::{
    backtrace::Backtrace,
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, debug_span, error, info, warn};

use crate::{
    config::PoolConfig,
    error::{ConnectError, Error, Result},
    factory::{ConnectionFactory, SessionReset},
    handle::PooledConnection,
    interceptor::{Binding, Interceptor, InterceptorChain, InterceptorRegistry, PoolInfo, ResetRequest},
    metrics::{pool_kv, Metrics, PoolState, POOL_METRICS},
    queue::{BoundedQueue, FairQueue, Poll, Wait, WaitQueue},
    reaper::{Reaper, Sweep},
    resource::{PooledResource, ResourceState, Validation, ValidationKind},
};

type Resource<F> = Arc<PooledResource<<F as ConnectionFactory>::Connection>>;

/// Bounded pool of physical connections.
///
/// Cheap to clone: all clones share the same pool. The pool is closed when the last clone and
/// the last borrowed connection are dropped, or explicitly with [`Self::close`].
pub struct ConnectionPool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cumulative pool counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PoolStats {
    /// Physical connections created.
    pub created: u64,
    /// Successful borrows.
    pub borrowed: u64,
    /// Connections given back by borrowers.
    pub returned: u64,
    /// Physical connections destroyed, for any reason.
    pub released: u64,
    /// Abandoned connections reclaimed by the sweeper.
    pub reclaimed: u64,
    /// Borrows that ran out of time.
    pub timeouts: u64,
    /// Failed validations.
    pub validation_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
    released: AtomicU64,
    reclaimed: AtomicU64,
    timeouts: AtomicU64,
    validation_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            borrowed: self.borrowed.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }
}

/// Result of closing a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct CloseSummary {
    /// Connections destroyed cleanly.
    pub destroyed: usize,
    /// Connections whose destruction reported an error.
    pub failed: usize,
}

/// State shared by all clones of a pool and its handles.
pub(crate) struct Shared<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    info: Arc<PoolInfo>,
    prototypes: Vec<Box<dyn Interceptor>>,
    /// Idle connections, plus one slot per live physical connection.
    idle: Box<dyn WaitQueue<Resource<F>>>,
    busy: DashMap<u64, Resource<F>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    counters: Counters,
    reaper: Mutex<Option<Reaper>>,
    metrics: Arc<Metrics>,
    label: [KeyValue; 1],
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Start a pool with the built-in interceptors available.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the interceptor chain cannot be built, or if creating the initial
    /// connections failed.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self> {
        Self::with_registry(config, factory, &InterceptorRegistry::default())
    }

    /// Start a pool, resolving interceptor names through a custom registry.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the interceptor chain cannot be built, or if creating the initial
    /// connections failed.
    pub fn with_registry(
        mut config: PoolConfig,
        factory: F,
        registry: &InterceptorRegistry,
    ) -> Result<Self> {
        config.sanitize();
        let prototypes = registry.build(&config.interceptors)?;
        let idle: Box<dyn WaitQueue<Resource<F>>> = if config.fair_queue {
            Box::new(FairQueue::new(config.max_active))
        } else {
            Box::new(BoundedQueue::new(config.max_active))
        };
        let info = Arc::new(PoolInfo {
            name: config.name.clone(),
            use_equals: config.use_equals,
            defaults: config.defaults.clone(),
        });
        let label = pool_kv(&config.name);
        let shared = Arc::new(Shared {
            factory,
            info,
            prototypes,
            idle,
            busy: DashMap::with_capacity(config.max_active),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            reaper: Mutex::new(None),
            metrics: POOL_METRICS.deref().clone(),
            label,
            config,
        });
        for prototype in &shared.prototypes {
            prototype.pool_started(&shared.info);
        }
        if shared.config.is_sweeper_enabled() {
            match Reaper::start(
                &shared.config.name,
                shared.config.time_between_eviction_runs,
                Arc::downgrade(&shared),
            ) {
                Ok(reaper) => *shared.reaper.lock() = Some(reaper),
                Err(err) => error!(
                    pool = %shared.config.name,
                    %err,
                    "unable to start pool sweeper, continuing without it"
                ),
            }
        }
        let pool = Self { shared };
        pool.fill()?;
        info!(
            pool = %pool.shared.config.name,
            initial_size = pool.shared.config.initial_size,
            max_active = pool.shared.config.max_active,
            fair = pool.shared.config.fair_queue,
            "connection pool started"
        );
        pool.shared.publish_state();
        Ok(pool)
    }

    /// Create the initial connections.
    fn fill(&self) -> Result<()> {
        let shared = &self.shared;
        for _ in 0..shared.config.initial_size {
            if !shared.idle.reserve() {
                break;
            }
            match shared.create() {
                Ok(resource) => {
                    if let Err(resource) = shared.idle.offer(resource) {
                        shared.dispose(&resource);
                    }
                }
                Err(err) => {
                    error!(pool = %shared.config.name, %err, "unable to create initial connections");
                    shared.close(true, true);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Borrow a connection, waiting up to the configured `max_wait`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AcquireTimeout`] if no connection became available in time,
    /// [`Error::Connect`] if a new connection could not be established, or
    /// [`Error::PoolClosed`].
    pub fn borrow(&self) -> Result<PooledConnection<F>> {
        let _span = debug_span!("pool_acquire", pool = %self.shared.config.name).entered();
        let deadline = self.shared.config.wait_budget().map(|d| Instant::now() + d);
        self.acquire(Wait::Until(deadline))
    }

    /// Borrow a connection without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WouldBlock`] if no connection is idle and the pool is at capacity.
    pub fn try_borrow(&self) -> Result<PooledConnection<F>> {
        let _span = debug_span!("pool_try_acquire", pool = %self.shared.config.name).entered();
        self.acquire(Wait::Never)
    }

    /// Borrow a connection, waiting up to `timeout` instead of the configured `max_wait`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::borrow`].
    pub fn borrow_timeout(&self, timeout: Duration) -> Result<PooledConnection<F>> {
        let _span = debug_span!(
            "pool_timed_acquire",
            pool = %self.shared.config.name,
            ?timeout
        )
        .entered();
        self.acquire(Wait::Until(Some(Instant::now() + timeout)))
    }

    /// Borrow a connection from async code, without blocking the runtime.
    ///
    /// Waits up to the configured `max_wait` on the runtime's blocking thread pool. Borrowers
    /// keep their place in a fair queue either way. If the future is dropped early, a connection
    /// obtained in the meantime goes straight back to the pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::borrow`], plus [`Error::Task`] if the blocking task panicked or was
    /// cancelled by runtime shutdown.
    #[cfg(feature = "tokio")]
    pub async fn borrow_async(&self) -> Result<PooledConnection<F>> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.borrow()).await?
    }

    fn acquire(&self, wait: Wait) -> Result<PooledConnection<F>> {
        let shared = &self.shared;
        let started = Instant::now();
        loop {
            if shared.is_closed() {
                return Err(Error::PoolClosed);
            }
            let (resource, fresh) = match shared.idle.poll(wait) {
                Poll::Item(resource) => (resource, false),
                Poll::Slot if shared.is_closed() => {
                    shared.release_slot();
                    return Err(Error::PoolClosed);
                }
                Poll::Slot => (shared.create()?, true),
                Poll::TimedOut if wait == Wait::Never => return Err(Error::WouldBlock),
                Poll::TimedOut => return Err(shared.timed_out(started)),
                Poll::Closed => return Err(Error::PoolClosed),
            };
            if let Some(handle) = self.lend(resource, fresh)? {
                shared
                    .metrics
                    .wait_time
                    .record(started.elapsed().as_secs_f64(), &shared.label);
                return Ok(handle);
            }
        }
    }

    /// Validate and hand a resource out. [`None`] means an idle resource was discarded and the
    /// borrow should be retried.
    fn lend(&self, resource: Resource<F>, fresh: bool) -> Result<Option<PooledConnection<F>>> {
        let shared = &self.shared;
        let mut state = resource.state.lock();
        if shared.is_closed() {
            let conn = resource.discard(&mut state);
            drop(state);
            shared.destroy(&resource, conn);
            return Err(Error::PoolClosed);
        }
        if state.validate(&resource.info, &shared.factory, &shared.config, ValidationKind::Borrow)
            == Validation::Invalid
        {
            Counters::bump(&shared.counters.validation_failures);
            let conn = resource.discard(&mut state);
            drop(state);
            shared.destroy(&resource, conn);
            return if fresh {
                Err(ConnectError::Validation.into())
            } else {
                Ok(None)
            };
        }
        let now = Instant::now();
        state.lease = state.lease.wrapping_add(1);
        state.borrowed_at = Some(now);
        state.suspect_reported = false;
        state.trace = shared
            .config
            .is_trace_enabled()
            .then(Backtrace::force_capture);
        state.chain.bind(&Binding {
            pool: shared.info.clone(),
            resource: resource.info.clone(),
        });
        resource.info.touch();
        let lease = state.lease;
        shared.busy.insert(resource.id(), resource.clone());
        drop(state);
        Counters::bump(&shared.counters.borrowed);
        debug!(pool = %shared.config.name, resource = resource.id(), fresh, "connection borrowed");
        Ok(Some(PooledConnection::new(self.clone(), resource, lease, now)))
    }

    /// Give a borrowed connection back to the pool.
    ///
    /// Same as dropping the handle.
    pub fn release(&self, conn: PooledConnection<F>) {
        drop(conn);
    }

    /// Close the pool, destroying idle connections and every connection still borrowed.
    pub fn close(&self) -> CloseSummary {
        self.shared.close(true, true)
    }

    /// Close the pool.
    ///
    /// Without `force`, borrowed connections are destroyed as they are returned.
    pub fn close_with(&self, force: bool) -> CloseSummary {
        self.shared.close(force, true)
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Effective configuration, after bounds were brought into order.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Number of borrowed connections.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.busy.len()
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.shared.idle.len()
    }

    /// Number of live physical connections.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.idle.size()
    }

    /// Number of borrowers blocked waiting for a connection.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.shared.idle.waiting()
    }

    /// Whether the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Current pool state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    /// Cumulative counters since the pool started.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot()
    }

    /// Pool-wide instance of a configured interceptor, if present.
    ///
    /// Useful for interceptors that gather per-pool data, like [`SlowQueryReport`].
    ///
    /// [`SlowQueryReport`]: crate::interceptor::SlowQueryReport
    #[must_use]
    pub fn interceptor<T: Interceptor + Clone>(&self) -> Option<T> {
        self.shared
            .prototypes
            .iter()
            .find_map(|p| p.as_any().downcast_ref::<T>())
            .cloned()
    }

    pub(crate) fn shared(&self) -> &Shared<F> {
        &self.shared
    }
}

impl<F: ConnectionFactory> Shared<F> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn metrics(&self) -> (&Metrics, &[KeyValue; 1]) {
        (&self.metrics, &self.label)
    }

    /// Open a new connection into a slot already reserved in the idle queue.
    ///
    /// The slot is released again on failure.
    fn create(&self) -> Result<Resource<F>> {
        let started = Instant::now();
        let mut conn = match self.factory.create(&self.config.connection) {
            Ok(conn) => conn,
            Err(err) => {
                error!(pool = %self.config.name, %err, "unable to create a new connection");
                self.release_slot();
                return Err(ConnectError::Factory(Box::new(err)).into());
            }
        };
        if let Some(sql) = &self.config.init_sql {
            if let Err(err) = self.factory.execute(&mut conn, sql) {
                error!(pool = %self.config.name, %err, "connection init SQL failed");
                if let Err(err) = self.factory.destroy(conn) {
                    warn!(pool = %self.config.name, %err, "unable to close connection");
                }
                self.release_slot();
                return Err(ConnectError::InitSql(Box::new(err)).into());
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let chain = InterceptorChain::new(self.prototypes.clone());
        let resource = Arc::new(PooledResource::new(id, Instant::now(), conn, chain));
        let mut state = resource.state.lock();
        if state.validate(&resource.info, &self.factory, &self.config, ValidationKind::Connect)
            == Validation::Invalid
        {
            Counters::bump(&self.counters.validation_failures);
            let conn = resource.discard(&mut state);
            drop(state);
            self.destroy(&resource, conn);
            Counters::bump(&self.counters.created);
            return Err(ConnectError::Validation.into());
        }
        drop(state);
        Counters::bump(&self.counters.created);
        self.metrics
            .create_time
            .record(started.elapsed().as_secs_f64(), &self.label);
        debug!(pool = %self.config.name, resource = id, "connection created");
        Ok(resource)
    }

    /// Give back a slot reserved for a connection that never materialized or was destroyed.
    ///
    /// In a fair pool the slot goes straight to the longest-waiting borrower.
    fn release_slot(&self) {
        self.idle.release();
    }

    /// Close a physical connection taken out by [`PooledResource::discard`].
    ///
    /// Returns `Some(true)` on clean destruction, `Some(false)` on error and [`None`] if there
    /// was nothing to destroy.
    fn destroy(&self, resource: &PooledResource<F::Connection>, conn: Option<F::Connection>) -> Option<bool> {
        let conn = conn?;
        let id = resource.id();
        let clean = match self.factory.destroy(conn) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    pool = %self.config.name,
                    resource = id,
                    age = ?resource.info.age(),
                    %err,
                    "unable to close connection"
                );
                false
            }
        };
        Counters::bump(&self.counters.released);
        self.release_slot();
        debug!(pool = %self.config.name, resource = id, "connection released");
        Some(clean)
    }

    /// Discard and destroy a resource that is not borrowed.
    fn dispose(&self, resource: &PooledResource<F::Connection>) -> Option<bool> {
        let mut state = resource.state.lock();
        let conn = resource.discard(&mut state);
        drop(state);
        self.destroy(resource, conn)
    }

    /// Return a borrowed resource. Stale leases and discarded resources are ignored.
    pub(crate) fn give_back(&self, resource: &Resource<F>, lease: u64) {
        let mut state = resource.state.lock();
        if !state.is_leased_to(lease) || resource.info.is_discarded() {
            return;
        }
        state.borrowed_at = None;
        state.trace = None;
        let keep = self.recycle(resource, &mut state);
        state.chain.unbind();
        resource.info.touch();
        self.busy.remove(&resource.id());
        Counters::bump(&self.counters.returned);
        if !keep || self.is_closed() || self.idle.len() >= self.config.max_idle {
            let conn = resource.discard(&mut state);
            drop(state);
            self.destroy(resource, conn);
            return;
        }
        drop(state);
        if let Err(resource) = self.idle.offer(resource.clone()) {
            self.dispose(&resource);
        }
    }

    /// Reset session and validate a returned resource. Returns whether it may be reused.
    fn recycle(&self, resource: &PooledResource<F::Connection>, state: &mut ResourceState<F::Connection>) -> bool {
        let mut request = ResetRequest {
            commit: self.config.commit_on_return,
            rollback: self.config.rollback_on_return,
            restore: false,
        };
        state.chain.close_invoked(&mut request);
        let reset = SessionReset {
            commit: request.commit,
            rollback: request.rollback,
            restore: request.restore.then_some(&self.config.defaults),
        };
        if !reset.is_noop() {
            if let Some(conn) = state.conn.as_mut() {
                if let Err(err) = self.factory.reset_session(conn, &reset) {
                    warn!(
                        pool = %self.config.name,
                        resource = resource.id(),
                        %err,
                        "unable to reset connection session"
                    );
                    return false;
                }
            }
        }
        if state.validate(&resource.info, &self.factory, &self.config, ValidationKind::Return)
            == Validation::Invalid
        {
            Counters::bump(&self.counters.validation_failures);
            return false;
        }
        if !self.config.max_age.is_zero() && resource.info.age() > self.config.max_age {
            debug!(
                pool = %self.config.name,
                resource = resource.id(),
                age = ?resource.info.age(),
                "connection exceeded max age"
            );
            return false;
        }
        true
    }

    fn timed_out(&self, started: Instant) -> Error {
        Counters::bump(&self.counters.timeouts);
        self.metrics.timeouts.add(1, &self.label);
        let in_use = self.busy.len();
        warn!(
            pool = %self.config.name,
            waited = ?started.elapsed(),
            in_use,
            "timed out waiting for a connection"
        );
        Error::AcquireTimeout {
            pool: self.config.name.clone(),
            waited: started.elapsed(),
            in_use,
        }
    }

    fn state(&self) -> PoolState {
        PoolState {
            max_size: self.config.max_active,
            size: self.idle.size(),
            idle: self.idle.len(),
            in_use: self.busy.len(),
            min_idle: self.config.min_idle,
            max_idle: self.config.max_idle,
            waiting: self.idle.waiting(),
        }
    }

    fn publish_state(&self) {
        self.metrics.record_state(&self.label, &self.state());
    }

    fn close(&self, force: bool, join: bool) -> CloseSummary {
        let mut summary = CloseSummary::default();
        if self.closed.swap(true, Ordering::AcqRel) {
            return summary;
        }
        info!(pool = %self.config.name, force, "closing connection pool");
        if let Some(mut reaper) = self.reaper.lock().take() {
            reaper.stop(join);
        }
        self.idle.close();
        let mut tally = |outcome: Option<bool>| match outcome {
            Some(true) => summary.destroyed += 1,
            Some(false) => summary.failed += 1,
            None => {}
        };
        while let Some(resource) = self.idle.try_poll() {
            tally(self.dispose(&resource));
        }
        if force {
            let busy: Vec<_> = self.busy.iter().map(|e| e.value().clone()).collect();
            for resource in busy {
                let mut state = resource.state.lock();
                let conn = resource.discard(&mut state);
                self.busy.remove(&resource.id());
                drop(state);
                tally(self.destroy(&resource, conn));
            }
        }
        for prototype in &self.prototypes {
            prototype.pool_closed(&self.info);
        }
        self.publish_state();
        info!(
            pool = %self.config.name,
            destroyed = summary.destroyed,
            failed = summary.failed,
            "connection pool closed"
        );
        summary
    }

    /// Reclaim abandoned connections and report suspect ones.
    fn check_abandoned(&self) {
        let timeout = self.config.remove_abandoned_timeout;
        let suspect = self.config.suspect_timeout;
        let reclaim = self.config.remove_abandoned && !timeout.is_zero() && self.is_usage_high();
        if !reclaim && suspect.is_zero() {
            return;
        }
        let busy: Vec<_> = self.busy.iter().map(|e| e.value().clone()).collect();
        for resource in busy {
            // Locked resources are in the middle of a call.
            let Some(mut state) = resource.state.try_lock() else {
                continue;
            };
            if resource.info.is_discarded() || state.borrowed_at.is_none() {
                continue;
            }
            let inactive = resource.info.since_touched();
            if reclaim && inactive > timeout {
                let trace = state.trace.take();
                let conn = resource.discard(&mut state);
                self.busy.remove(&resource.id());
                drop(state);
                if self.config.log_abandoned {
                    warn!(
                        pool = %self.config.name,
                        resource = resource.id(),
                        ?inactive,
                        trace = %trace.map(|t| t.to_string()).unwrap_or_default(),
                        "reclaiming abandoned connection"
                    );
                } else {
                    warn!(
                        pool = %self.config.name,
                        resource = resource.id(),
                        ?inactive,
                        "reclaiming abandoned connection"
                    );
                }
                if self.destroy(&resource, conn).is_some() {
                    Counters::bump(&self.counters.reclaimed);
                }
            } else if !suspect.is_zero() && inactive > suspect && !state.suspect_reported {
                state.suspect_reported = true;
                warn!(
                    pool = %self.config.name,
                    resource = resource.id(),
                    ?inactive,
                    trace = %state.trace.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "connection held longer than suspect timeout"
                );
            }
        }
    }

    /// Whether enough of the pool is borrowed for abandoned connections to be reclaimed.
    fn is_usage_high(&self) -> bool {
        let threshold = usize::from(self.config.abandon_when_percentage_full);
        threshold == 0 || self.busy.len() * 100 / self.config.max_active >= threshold
    }

    /// Number of idle resources to examine in one sweep.
    fn sample_size(&self, idle: usize) -> usize {
        match self.config.num_tests_per_eviction_run {
            0 => idle,
            n if n > 0 => idle.min(n.unsigned_abs() as usize),
            n => idle.div_ceil(n.unsigned_abs() as usize),
        }
    }

    /// Evict stale idle connections and validate the rest.
    fn check_idle(&self) {
        let idle = self.idle.snapshot();
        let sample = self.sample_size(idle.len());
        let evictable = self.config.min_evictable_idle;
        let max_age = self.config.max_age;
        for resource in idle.into_iter().take(sample) {
            if self.is_closed() {
                return;
            }
            let stale = (!evictable.is_zero() && resource.info.since_touched() > evictable)
                || (!max_age.is_zero() && resource.info.age() > max_age);
            if stale && self.idle.len() > self.config.min_idle {
                if self.take_idle(&resource) {
                    debug!(
                        pool = %self.config.name,
                        resource = resource.id(),
                        idle = ?resource.info.since_touched(),
                        "evicting idle connection"
                    );
                    self.dispose(&resource);
                }
                continue;
            }
            if self.config.test_while_idle {
                self.test_idle(resource);
            }
        }
    }

    /// Validate a single idle resource outside of the idle queue.
    fn test_idle(&self, resource: Resource<F>) {
        if !self.take_idle(&resource) {
            return;
        }
        let mut state = resource.state.lock();
        if state.validate(&resource.info, &self.factory, &self.config, ValidationKind::Idle)
            == Validation::Invalid
        {
            Counters::bump(&self.counters.validation_failures);
            let conn = resource.discard(&mut state);
            drop(state);
            self.destroy(&resource, conn);
            return;
        }
        drop(state);
        if let Err(resource) = self.idle.offer(resource) {
            self.dispose(&resource);
        }
    }

    /// Take a specific resource out of the idle queue. Fails if it was borrowed meanwhile.
    fn take_idle(&self, resource: &Resource<F>) -> bool {
        !self
            .idle
            .remove(&mut |r| Arc::ptr_eq(r, resource))
            .is_empty()
    }
}

impl<F: ConnectionFactory> Sweep for Shared<F> {
    fn sweep(&self) {
        let _span = debug_span!("pool_sweep", pool = %self.config.name).entered();
        if self.is_closed() {
            return;
        }
        self.check_abandoned();
        self.check_idle();
        self.publish_state();
    }
}

impl<F: ConnectionFactory> Drop for Shared<F> {
    fn drop(&mut self) {
        self.close(true, false);
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use crate::config::ConnectionProperties;

    struct NullFactory;

    impl ConnectionFactory for NullFactory {
        type Connection = ();
        type Error = Infallible;

        fn create(&self, _props: &ConnectionProperties) -> Result<(), Infallible> {
            Ok(())
        }

        fn validate(&self, _conn: &mut (), _query: Option<&str>) -> bool {
            true
        }

        fn destroy(&self, _conn: ()) -> Result<(), Infallible> {
            Ok(())
        }
    }

    fn sample(n: i32, idle: usize) -> usize {
        let mut config = PoolConfig::default();
        config.num_tests_per_eviction_run = n;
        config.min_idle = 0;
        config.initial_size = 0;
        let pool = ConnectionPool::new(config, NullFactory).unwrap();
        pool.shared().sample_size(idle)
    }

    #[test]
    fn sample_size_rules() {
        assert_eq!(sample(0, 7), 7);
        assert_eq!(sample(3, 7), 3);
        assert_eq!(sample(10, 7), 7);
        assert_eq!(sample(-2, 7), 4);
        assert_eq!(sample(-3, 9), 3);
        assert_eq!(sample(-1, 0), 0);
    }

    #[test]
    fn usage_gate() {
        let mut config = PoolConfig::default();
        config.with_capacity(0, 0, 4, 4);
        config.abandon_when_percentage_full = 50;
        let pool = ConnectionPool::new(config, NullFactory).unwrap();
        let _a = pool.borrow().unwrap();
        assert!(!pool.shared().is_usage_high());
        let _b = pool.borrow().unwrap();
        assert!(pool.shared().is_usage_high());
    }
}

//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tidepool::{config::ConnectionProperties, ConnectionFactory, PoolConfig, SessionReset};

/// Error produced by the mock factory.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub String);

/// Connection handed out by the mock factory.
#[derive(Debug)]
pub struct MockConnection {
    pub id: u64,
    pub statements: Vec<String>,
    pub auto_commit: bool,
}

/// Session reset as observed by the factory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedReset {
    pub id: u64,
    pub commit: bool,
    pub rollback: bool,
    pub restored_auto_commit: Option<bool>,
}

/// Observable state of the mock factory.
#[derive(Debug, Default)]
pub struct MockState {
    next_id: AtomicU64,
    pub created: AtomicUsize,
    pub validations: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_validation: AtomicBool,
    pub fail_init_sql: AtomicBool,
    pub destroyed: Mutex<HashMap<u64, usize>>,
    pub executed: Mutex<Vec<(u64, String)>>,
    pub resets: Mutex<Vec<ObservedReset>>,
}

/// Connection factory recording everything it is asked to do.
#[derive(Clone, Debug, Default)]
pub struct MockFactory {
    pub state: Arc<MockState>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Total number of destroy calls.
    pub fn destroyed(&self) -> usize {
        self.state.destroyed.lock().values().sum()
    }

    /// Number of destroy calls for a single connection.
    pub fn destroyed_times(&self, id: u64) -> usize {
        self.state.destroyed.lock().get(&id).copied().unwrap_or_default()
    }

    /// Whether no connection was ever destroyed twice.
    pub fn destroyed_at_most_once(&self) -> bool {
        self.state.destroyed.lock().values().all(|&n| n == 1)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_validation(&self, fail: bool) {
        self.state.fail_validation.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_init_sql(&self, fail: bool) {
        self.state.fail_init_sql.store(fail, Ordering::SeqCst);
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;
    type Error = MockError;

    fn create(&self, props: &ConnectionProperties) -> Result<MockConnection, MockError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(MockError(format!(
                "connection refused: {}",
                props.url.as_deref().unwrap_or("<none>")
            )));
        }
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id,
            statements: Vec::new(),
            auto_commit: true,
        })
    }

    fn validate(&self, _conn: &mut MockConnection, _query: Option<&str>) -> bool {
        self.state.validations.fetch_add(1, Ordering::SeqCst);
        !self.state.fail_validation.load(Ordering::SeqCst)
    }

    fn execute(&self, conn: &mut MockConnection, sql: &str) -> Result<(), MockError> {
        if self.state.fail_init_sql.load(Ordering::SeqCst) {
            return Err(MockError(format!("syntax error in `{sql}`")));
        }
        self.state.executed.lock().push((conn.id, sql.to_string()));
        conn.statements.push(sql.to_string());
        Ok(())
    }

    fn reset_session(
        &self,
        conn: &mut MockConnection,
        reset: &SessionReset<'_>,
    ) -> Result<(), MockError> {
        let restored_auto_commit = reset.restore.and_then(|d| d.auto_commit);
        if let Some(auto_commit) = restored_auto_commit {
            conn.auto_commit = auto_commit;
        }
        self.state.resets.lock().push(ObservedReset {
            id: conn.id,
            commit: reset.commit,
            rollback: reset.rollback,
            restored_auto_commit,
        });
        Ok(())
    }

    fn destroy(&self, conn: MockConnection) -> Result<(), MockError> {
        *self.state.destroyed.lock().entry(conn.id).or_default() += 1;
        Ok(())
    }
}

/// Configuration with no warm-up and no background sweeper.
pub fn quiet_config(max_active: usize) -> PoolConfig {
    let mut config = PoolConfig::default();
    config
        .with_name("test")
        .with_capacity(0, 0, max_active, max_active);
    config.time_between_eviction_runs = Duration::ZERO;
    config.max_wait = Duration::from_secs(5);
    config.connection = ConnectionProperties::new("mock://db");
    config
}

/// Install a log subscriber writing to the test harness.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll a condition until it holds or the timeout passes.
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

//! Load generator for [`tidepool`].
//!
//! Runs a number of worker threads borrowing connections from a pool backed by an in-memory
//! connection factory, then prints pool state and counters.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use tidepool::{
    config::ConnectionProperties, interceptor::SlowQueryReport, ConnectionFactory,
    ConnectionPool, Error, Operation, PoolConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to pool configuration file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        value_parser = validate_config_path,
        default_value = default_config_path(),
        env = "POOL_STRESS_CONFIG_FILE"
    )]
    config_file: String,
    /// Number of worker threads.
    #[arg(short, long, default_value_t = 16)]
    threads: usize,
    /// Borrows performed by each worker.
    #[arg(short, long, default_value_t = 100)]
    iterations: usize,
    /// Time a worker holds a borrowed connection.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10ms")]
    hold: Duration,
    /// Fail every N-th validation. Zero never fails.
    #[arg(long, default_value_t = 0)]
    fail_every: u64,
    /// Number of connections deliberately leaked by workers.
    #[arg(long, default_value_t = 0)]
    leak: usize,
}

/// Default path for configuration file.
fn default_config_path() -> &'static str {
    "demos/pool-stress/config.yaml"
}

/// Sanitize provided configuration file path.
fn validate_config_path(v: &str) -> Result<String, String> {
    let path = v.to_string();
    let meta = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) => return Err(format!("Unable to check file: {e}")),
    };
    if !meta.is_file() {
        return Err("Configuration is not a file".into());
    }
    Ok(path)
}

/// Error returned by in-memory connections.
#[derive(Debug, thiserror::Error)]
enum MemoryError {
    /// Connection URL scheme is not supported.
    #[error("unsupported URL: {0}")]
    Url(String),
}

/// In-memory stand-in for a database connection.
#[derive(Debug)]
struct MemoryConnection {
    auto_commit: bool,
    queries: u64,
}

impl MemoryConnection {
    fn query(&mut self, hold: Duration) -> Result<u64, MemoryError> {
        thread::sleep(hold);
        self.queries += 1;
        Ok(self.queries)
    }
}

/// Factory producing [`MemoryConnection`]s.
#[derive(Debug, Default)]
struct MemoryFactory {
    fail_every: u64,
    validations: AtomicU64,
}

impl ConnectionFactory for MemoryFactory {
    type Connection = MemoryConnection;
    type Error = MemoryError;

    fn create(&self, props: &ConnectionProperties) -> Result<MemoryConnection, MemoryError> {
        match props.url.as_deref() {
            Some(url) if url.starts_with("mem://") => Ok(MemoryConnection {
                auto_commit: true,
                queries: 0,
            }),
            other => Err(MemoryError::Url(other.unwrap_or_default().to_string())),
        }
    }

    fn validate(&self, _conn: &mut MemoryConnection, _query: Option<&str>) -> bool {
        let n = self.validations.fetch_add(1, Ordering::Relaxed) + 1;
        self.fail_every == 0 || n % self.fail_every != 0
    }

    fn reset_session(
        &self,
        conn: &mut MemoryConnection,
        reset: &tidepool::SessionReset<'_>,
    ) -> Result<(), MemoryError> {
        if let Some(auto_commit) = reset.restore.and_then(|d| d.auto_commit) {
            conn.auto_commit = auto_commit;
        }
        Ok(())
    }

    fn destroy(&self, _conn: MemoryConnection) -> Result<(), MemoryError> {
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();
    let args = Args::parse();
    let config = PoolConfig::builder()
        .with_file(&args.config_file)
        .with_env("POOL_STRESS")
        .build()?;
    let factory = MemoryFactory {
        fail_every: args.fail_every,
        ..Default::default()
    };
    let pool = ConnectionPool::new(config, factory)?;
    info!(state = ?pool.state(), "pool ready");

    let timeouts = Arc::new(AtomicUsize::new(0));
    let leaks = Arc::new(AtomicUsize::new(args.leak));
    let started = Instant::now();
    let workers: Vec<_> = (0..args.threads)
        .map(|idx| {
            let pool = pool.clone();
            let timeouts = timeouts.clone();
            let leaks = leaks.clone();
            let hold = args.hold;
            let iterations = args.iterations;
            thread::Builder::new()
                .name(format!("worker-{idx}"))
                .spawn(move || {
                    for _ in 0..iterations {
                        let mut conn = match pool.borrow() {
                            Ok(conn) => conn,
                            Err(err) if err.is_timeout() => {
                                timeouts.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }
                            Err(Error::PoolClosed) => return,
                            Err(err) => {
                                warn!(%err, "borrow failed");
                                continue;
                            }
                        };
                        let res = conn
                            .set(Operation::SetAutoCommit(false), |c| {
                                c.auto_commit = false;
                                Ok::<_, MemoryError>(())
                            })
                            .and_then(|()| {
                                conn.execute(Operation::Query("SELECT 1"), |c| c.query(hold))
                            });
                        if let Err(err) = res {
                            warn!(%err, "query failed");
                        }
                        let leak = leaks
                            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                            .is_ok();
                        if leak {
                            std::mem::forget(conn);
                        }
                    }
                })
        })
        .collect::<Result<_, _>>()?;
    for worker in workers {
        if worker.join().is_err() {
            warn!("worker thread panicked");
        }
    }
    info!(elapsed = ?started.elapsed(), "load finished");

    println!("state: {}", serde_json::to_string_pretty(&pool.state())?);
    println!("stats: {}", serde_json::to_string_pretty(&pool.stats())?);
    println!("timeouts seen by workers: {}", timeouts.load(Ordering::Relaxed));
    if let Some(report) = pool.interceptor::<SlowQueryReport>() {
        for stat in report.stats() {
            println!(
                "slow query {:?}: {} slow, {} failed, max {:?}",
                stat.query, stat.slow, stat.failures, stat.max_time
            );
        }
    }
    let summary = pool.close();
    info!(?summary, "pool closed");
    Ok(())
}

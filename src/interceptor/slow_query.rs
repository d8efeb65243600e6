use std::{
    any::Any,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::{
    config::{ConfigError, InterceptorSpec},
    interceptor::{Binding, Interceptor, Next, Operation, Outcome, PoolInfo},
};

/// Statistics of a single slow or failed statement.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct QueryStats {
    /// Statement text.
    pub query: String,
    /// Number of slow executions.
    pub slow: u64,
    /// Number of failed executions.
    pub failures: u64,
    /// Combined time of all recorded executions.
    pub total_time: Duration,
    /// Fastest recorded execution.
    pub min_time: Duration,
    /// Slowest recorded execution.
    pub max_time: Duration,
    /// Time of the latest recorded execution.
    pub last_invoked: Instant,
}

impl QueryStats {
    fn new(query: String, now: Instant) -> Self {
        Self {
            query,
            slow: 0,
            failures: 0,
            total_time: Duration::ZERO,
            min_time: Duration::MAX,
            max_time: Duration::ZERO,
            last_invoked: now,
        }
    }

    fn record(&mut self, elapsed: Duration, failed: bool, now: Instant) {
        if failed {
            self.failures += 1;
        } else {
            self.slow += 1;
        }
        self.total_time += elapsed;
        self.min_time = self.min_time.min(elapsed);
        self.max_time = self.max_time.max(elapsed);
        self.last_invoked = now;
    }
}

/// Reports statements that take longer than a threshold and keeps per-pool statistics on them.
///
/// Properties: `threshold` (milliseconds, default 100), `maxQueries` (default 1000),
/// `logSlow` (default `true`) and `logFailed` (default `false`).
#[derive(Clone, Debug)]
pub struct SlowQueryReport {
    threshold: Duration,
    max_queries: usize,
    log_slow: bool,
    log_failed: bool,
    stats: Arc<DashMap<String, QueryStats>>,
    binding: Option<Binding>,
}

impl Default for SlowQueryReport {
    fn default() -> Self {
        Self {
            threshold: Duration::from_millis(100),
            max_queries: 1000,
            log_slow: true,
            log_failed: false,
            stats: Arc::default(),
            binding: None,
        }
    }
}

impl SlowQueryReport {
    /// Registered name.
    pub const NAME: &'static str = "SlowQueryReport";

    /// Statistics gathered so far, slowest first.
    #[must_use]
    pub fn stats(&self) -> Vec<QueryStats> {
        let mut stats: Vec<_> = self.stats.iter().map(|e| e.value().clone()).collect();
        stats.sort_by(|a, b| b.max_time.cmp(&a.max_time));
        stats
    }

    /// Execution time above which a statement is considered slow.
    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    fn record(&self, sql: &str, elapsed: Duration, failed: bool) {
        if self.max_queries == 0 {
            return;
        }
        let now = Instant::now();
        if !self.stats.contains_key(sql) && self.stats.len() >= self.max_queries {
            let oldest = self
                .stats
                .iter()
                .min_by_key(|e| e.value().last_invoked)
                .map(|e| e.key().clone());
            if let Some(key) = oldest {
                self.stats.remove(&key);
            }
        }
        self.stats
            .entry(sql.to_string())
            .or_insert_with(|| QueryStats::new(sql.to_string(), now))
            .record(elapsed, failed, now);
    }

    fn pool_name(&self) -> &str {
        self.binding.as_ref().map_or("", |b| b.pool.name.as_str())
    }
}

impl Interceptor for SlowQueryReport {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, spec: &InterceptorSpec) -> Result<(), ConfigError> {
        if let Some(threshold) = spec.property::<u64>("threshold")? {
            self.threshold = Duration::from_millis(threshold);
        }
        if let Some(max_queries) = spec.property("maxQueries")? {
            self.max_queries = max_queries;
        }
        if let Some(log_slow) = spec.property("logSlow")? {
            self.log_slow = log_slow;
        }
        if let Some(log_failed) = spec.property("logFailed")? {
            self.log_failed = log_failed;
        }
        Ok(())
    }

    fn reset(&mut self, binding: Option<&Binding>) {
        self.binding = binding.cloned();
    }

    fn invoke(&mut self, op: &Operation<'_>, next: Next<'_>) -> Outcome {
        let Some(sql) = op.sql().filter(|_| op.is_execution()) else {
            return next.run(op);
        };
        let started = Instant::now();
        let outcome = next.run(op);
        let elapsed = started.elapsed();
        match &outcome {
            Outcome::Failed(error) => {
                self.record(sql, elapsed, true);
                if self.log_failed {
                    warn!(pool = self.pool_name(), query = sql, ?elapsed, %error, "failed query");
                }
            }
            Outcome::Completed if elapsed > self.threshold => {
                self.record(sql, elapsed, false);
                if self.log_slow {
                    warn!(
                        pool = self.pool_name(),
                        query = sql,
                        ?elapsed,
                        threshold = ?self.threshold,
                        "slow query"
                    );
                }
            }
            _ => {}
        }
        outcome
    }

    fn pool_started(&self, pool: &PoolInfo) {
        info!(
            pool = %pool.name,
            threshold = ?self.threshold,
            max_queries = self.max_queries,
            "slow query report enabled"
        );
    }

    fn pool_closed(&self, _pool: &PoolInfo) {
        self.stats.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn run(report: &mut SlowQueryReport, op: Operation<'_>, delay: Duration, fail: bool) {
        let mut terminal = |_: &Operation<'_>| {
            thread::sleep(delay);
            if fail {
                Outcome::Failed("boom".into())
            } else {
                Outcome::Completed
            }
        };
        report.invoke(
            &op,
            Next {
                rest: &mut [],
                terminal: &mut terminal,
            },
        );
    }

    fn report(threshold: &str, max_queries: &str) -> SlowQueryReport {
        let mut report = SlowQueryReport::default();
        report
            .configure(
                &InterceptorSpec::new(SlowQueryReport::NAME)
                    .with_property("threshold", threshold)
                    .with_property("maxQueries", max_queries)
                    .with_property("logFailed", "true"),
            )
            .unwrap();
        report
    }

    #[test]
    fn only_slow_and_failed_are_recorded() {
        let mut report = report("20", "10");
        run(&mut report, Operation::Query("fast"), Duration::ZERO, false);
        run(&mut report, Operation::Query("slow"), Duration::from_millis(40), false);
        run(&mut report, Operation::Update("broken"), Duration::ZERO, true);
        run(&mut report, Operation::Prepare("ignored"), Duration::from_millis(40), false);
        let stats = report.stats();
        assert_eq!(stats.len(), 2);
        let slow = stats.iter().find(|s| s.query == "slow").unwrap();
        assert_eq!((slow.slow, slow.failures), (1, 0));
        assert!(slow.max_time >= Duration::from_millis(40));
        let broken = stats.iter().find(|s| s.query == "broken").unwrap();
        assert_eq!((broken.slow, broken.failures), (0, 1));
    }

    #[test]
    fn oldest_entry_evicted() {
        let mut report = report("0", "2");
        for sql in ["a", "b", "c"] {
            run(&mut report, Operation::Execute(sql), Duration::from_millis(2), false);
        }
        let mut queries: Vec<_> = report.stats().into_iter().map(|s| s.query).collect();
        queries.sort();
        assert_eq!(queries, vec!["b", "c"]);
    }

    #[test]
    fn clones_share_statistics() {
        let mut report = report("0", "10");
        let clone = report.clone();
        run(&mut report, Operation::Execute("x"), Duration::from_millis(2), false);
        assert_eq!(clone.stats().len(), 1);
        clone.pool_closed(&PoolInfo {
            name: "p".into(),
            use_equals: true,
            defaults: Default::default(),
        });
        assert!(report.stats().is_empty());
    }

    #[test]
    fn invalid_property() {
        let mut report = SlowQueryReport::default();
        let res = report.configure(
            &InterceptorSpec::new(SlowQueryReport::NAME).with_property("threshold", "soon"),
        );
        assert!(res.is_err());
    }
}

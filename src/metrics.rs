//! OpenTelemetry instruments and pool state snapshots.

use std::sync::{Arc, LazyLock};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram},
    Key, KeyValue, StringValue, Value,
};
use serde::Serialize;

/// Central metrics singleton shared by all pools.
pub(crate) static POOL_METRICS: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

const KEY_POOL_NAME: Key = Key::from_static_str("db.client.connection.pool.name");
const KEY_STATE: Key = Key::from_static_str("db.client.connection.state");

/// Storage for pool metrics.
pub(crate) struct Metrics {
    /// The number of connections that are currently in state described by the state attribute.
    pub(crate) conn_count: Gauge<u64>,
    /// The time it took to obtain an open connection from the pool.
    pub(crate) wait_time: Histogram<f64>,
    /// The time between borrowing a connection and returning it to the pool.
    pub(crate) use_time: Histogram<f64>,
    /// The time it took to create a new connection.
    pub(crate) create_time: Histogram<f64>,
    /// The maximum number of idle open connections allowed.
    pub(crate) idle_max: Gauge<u64>,
    /// The minimum number of idle open connections allowed.
    pub(crate) idle_min: Gauge<u64>,
    /// The maximum number of open connections allowed.
    pub(crate) conn_max: Gauge<u64>,
    /// The number of current pending requests for an open connection.
    pub(crate) pending_requests: Gauge<u64>,
    /// The number of connection timeouts that have occurred trying to obtain a connection.
    pub(crate) timeouts: Counter<u64>,
}

impl Metrics {
    /// Create new storage for pool metrics.
    pub(crate) fn new() -> Self {
        let meter = global::meter("tidepool");
        // db.client.connection.pool.name (string)
        // db.client.connection.state (idle / used)
        let conn_count = meter
            .u64_gauge("db.client.connection.count")
            .with_description("The number of connections that are currently in state described by the state attribute.")
            .build();
        let wait_time = meter
            .f64_histogram("db.client.connection.wait_time")
            .with_unit("s")
            .with_description("The time it took to obtain an open connection from the pool.")
            .build();
        let use_time = meter
            .f64_histogram("db.client.connection.use_time")
            .with_unit("s")
            .with_description(
                "The time between borrowing a connection and returning it to the pool.",
            )
            .build();
        let create_time = meter
            .f64_histogram("db.client.connection.create_time")
            .with_unit("s")
            .with_description("The time it took to create a new connection.")
            .build();
        let idle_max = meter
            .u64_gauge("db.client.connection.idle.max")
            .with_description("The maximum number of idle open connections allowed.")
            .build();
        let idle_min = meter
            .u64_gauge("db.client.connection.idle.min")
            .with_description("The minimum number of idle open connections allowed.")
            .build();
        let conn_max = meter
            .u64_gauge("db.client.connection.max")
            .with_description("The maximum number of open connections allowed.")
            .build();
        let pending_requests = meter
            .u64_gauge("db.client.connection.pending_requests")
            .with_description("The number of current pending requests for an open connection.")
            .build();
        let timeouts = meter
            .u64_counter("db.client.connection.timeouts")
            .with_description("The number of connection timeouts that have occurred trying to obtain a connection from the pool.")
            .build();
        Metrics {
            conn_count,
            wait_time,
            use_time,
            create_time,
            idle_max,
            idle_min,
            conn_max,
            pending_requests,
            timeouts,
        }
    }

    pub(crate) fn record_state(&self, label: &[KeyValue; 1], state: &PoolState) {
        self.conn_max.record(state.max_size as u64, label);
        self.conn_count
            .record(state.idle as u64, &status_kv(label[0].clone(), "idle"));
        self.conn_count
            .record(state.in_use as u64, &status_kv(label[0].clone(), "used"));
        self.idle_min.record(state.min_idle as u64, label);
        self.idle_max.record(state.max_idle as u64, label);
        self.pending_requests.record(state.waiting as u64, label);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

pub(crate) fn pool_kv(name: &str) -> [KeyValue; 1] {
    [KeyValue::new(KEY_POOL_NAME, name.to_string())]
}

pub(crate) fn status_kv(name: KeyValue, status: &'static str) -> [KeyValue; 2] {
    [
        name,
        KeyValue::new(KEY_STATE, Value::String(StringValue::from(status))),
    ]
}

/// Point-in-time state of a pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PoolState {
    /// Maximum total (`idle` + `in_use`) number of resources in the pool.
    pub max_size: usize,
    /// Current total number of resources, including those being created or handed over.
    pub size: usize,
    /// Current number of idle (not acquired) resources.
    pub idle: usize,
    /// Current number of in-use (acquired) resources.
    pub in_use: usize,
    /// Minimum number of idle resources to keep in the pool.
    pub min_idle: usize,
    /// Maximum number of idle resources to keep in the pool.
    pub max_idle: usize,
    /// Number of borrowers blocked waiting for a resource.
    pub waiting: usize,
}

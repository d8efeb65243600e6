use std::any::Any;

use tracing::debug;

use crate::{
    config::{Isolation, SessionDefaults},
    interceptor::{Binding, Interceptor, Next, Operation, Outcome, ResetRequest},
};

/// Caches session properties of the connection and restores configured defaults on return.
///
/// Setting a property to the value it already has is answered from the cache without
/// touching the connection.
#[derive(Clone, Debug, Default)]
pub struct ConnectionState {
    binding: Option<Binding>,
    cached: Cached,
}

/// Last known session properties, [`None`] meaning unknown.
#[derive(Clone, Debug, Default, PartialEq)]
struct Cached {
    auto_commit: Option<bool>,
    read_only: Option<bool>,
    isolation: Option<Isolation>,
    catalog: Option<String>,
}

impl Cached {
    /// Whether some known property deviates from its configured default.
    fn is_dirty(&self, defaults: &SessionDefaults) -> bool {
        fn differs<T: PartialEq>(current: &Option<T>, default: &Option<T>) -> bool {
            matches!((current, default), (Some(c), Some(d)) if c != d)
        }
        differs(&self.auto_commit, &defaults.auto_commit)
            || differs(&self.read_only, &defaults.read_only)
            || differs(&self.isolation, &defaults.isolation)
            || differs(&self.catalog, &defaults.catalog)
    }

    fn is_cached(&self, op: &Operation<'_>) -> bool {
        match op {
            Operation::SetAutoCommit(v) => self.auto_commit == Some(*v),
            Operation::SetReadOnly(v) => self.read_only == Some(*v),
            Operation::SetIsolation(v) => self.isolation == Some(*v),
            Operation::SetCatalog(v) => self.catalog.as_deref() == Some(*v),
            _ => false,
        }
    }

    fn record(&mut self, op: &Operation<'_>, success: bool) {
        match op {
            Operation::SetAutoCommit(v) => self.auto_commit = success.then_some(*v),
            Operation::SetReadOnly(v) => self.read_only = success.then_some(*v),
            Operation::SetIsolation(v) => self.isolation = success.then_some(*v),
            Operation::SetCatalog(v) => self.catalog = success.then(|| v.to_string()),
            _ => {}
        }
    }

    fn restore(&mut self, defaults: &SessionDefaults) {
        if defaults.auto_commit.is_some() {
            self.auto_commit = defaults.auto_commit;
        }
        if defaults.read_only.is_some() {
            self.read_only = defaults.read_only;
        }
        if defaults.isolation.is_some() {
            self.isolation = defaults.isolation;
        }
        if defaults.catalog.is_some() {
            self.catalog.clone_from(&defaults.catalog);
        }
    }
}

impl ConnectionState {
    /// Registered name.
    pub const NAME: &'static str = "ConnectionState";

    /// Whether the bound connection needs its session restored.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| self.cached.is_dirty(&b.pool.defaults))
    }
}

impl Interceptor for ConnectionState {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn reset(&mut self, binding: Option<&Binding>) {
        self.binding = binding.cloned();
    }

    fn invoke(&mut self, op: &Operation<'_>, next: Next<'_>) -> Outcome {
        if self.cached.is_cached(op) {
            return Outcome::Completed;
        }
        let outcome = next.run(op);
        self.cached.record(op, outcome.is_completed());
        outcome
    }

    fn close_invoked(&mut self, reset: &mut ResetRequest) {
        let Some(binding) = &self.binding else {
            return;
        };
        let defaults = &binding.pool.defaults;
        if self.cached.is_dirty(defaults) {
            debug!(
                pool = %binding.pool.name,
                resource = binding.resource.id(),
                "restoring session defaults"
            );
            reset.restore = true;
            self.cached.restore(defaults);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

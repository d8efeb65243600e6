//! Interceptor chain wrapped around every call made through a borrowed connection.
//!
//! Interceptors are instantiated once per pool from the configured [`InterceptorList`], cloned
//! once per pooled resource, and rebound to the resource on every borrow.
//!
//! [`InterceptorList`]: crate::config::InterceptorList

mod abandoned;
mod query_report;
mod registry;
mod slow_query;
mod state;
mod trap;

use std::{any::Any, fmt, mem, sync::Arc};

use dyn_clone::DynClone;

pub use self::{
    abandoned::ResetAbandonedTimer,
    query_report::QueryReport,
    registry::InterceptorRegistry,
    slow_query::{QueryStats, SlowQueryReport},
    state::ConnectionState,
    trap::ErrorTrap,
};
use crate::{
    config::{ConfigError, InterceptorSpec, Isolation, SessionDefaults},
    resource::ResourceInfo,
};

/// Policy object wrapped around connection calls.
///
/// Implementations must be cheap to clone: every pooled resource owns its own copy.
pub trait Interceptor: DynClone + Send + Sync + 'static {
    /// Registered name of this interceptor.
    fn name(&self) -> &str;

    /// Apply properties from the interceptor definition.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a property has an invalid value.
    fn configure(&mut self, _spec: &InterceptorSpec) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Bind to a freshly borrowed resource, or unbind with [`None`] on release.
    fn reset(&mut self, _binding: Option<&Binding>) {}

    /// Intercept a call. Pass it down the chain with [`Next::run`], or short-circuit by
    /// returning [`Outcome::Rejected`].
    fn invoke(&mut self, op: &Operation<'_>, next: Next<'_>) -> Outcome {
        next.run(op)
    }

    /// Connection is being returned to the pool.
    fn close_invoked(&mut self, _reset: &mut ResetRequest) {}

    /// Pool that owns this interceptor has started.
    fn pool_started(&self, _pool: &PoolInfo) {}

    /// Pool that owns this interceptor has been closed.
    fn pool_closed(&self, _pool: &PoolInfo) {}

    /// Upcast for downcasting to a concrete interceptor type.
    fn as_any(&self) -> &dyn Any;
}

dyn_clone::clone_trait_object!(Interceptor);

impl fmt::Debug for dyn Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Interceptor").field(&self.name()).finish()
    }
}

/// Pool-wide information visible to interceptors.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct PoolInfo {
    /// Pool name.
    pub name: String,
    /// Match operations by value, arguments included, rather than by kind.
    pub use_equals: bool,
    /// Configured session defaults.
    pub defaults: SessionDefaults,
}

/// Resource an interceptor is currently bound to.
#[derive(Clone, Debug)]
pub struct Binding {
    /// Owning pool.
    pub pool: Arc<PoolInfo>,
    /// Pooled resource metadata.
    pub resource: Arc<ResourceInfo>,
}

impl Binding {
    /// Check whether an intercepted call matches an operation a custom interceptor looks for.
    ///
    /// With the pool's `use_equals` setting, arguments such as statement text must match too.
    /// Without it, only the kind of operation is compared.
    #[must_use]
    pub fn matches(&self, op: &Operation<'_>, wanted: &Operation<'_>) -> bool {
        if self.pool.use_equals {
            op == wanted
        } else {
            mem::discriminant(op) == mem::discriminant(wanted)
        }
    }
}

/// Call made through a borrowed connection.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Operation<'a> {
    /// Statement returning rows.
    Query(&'a str),
    /// Statement of any kind.
    Execute(&'a str),
    /// Statement returning an update count.
    Update(&'a str),
    /// Statement preparation.
    Prepare(&'a str),
    /// Auto-commit mode change.
    SetAutoCommit(bool),
    /// Read-only mode change.
    SetReadOnly(bool),
    /// Transaction isolation change.
    SetIsolation(Isolation),
    /// Catalog change.
    SetCatalog(&'a str),
    /// Transaction commit.
    Commit,
    /// Transaction rollback.
    Rollback,
    /// Anything else, by name.
    Other(&'static str),
}

impl Operation<'_> {
    /// Name of the operation.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Execute(_) => "execute",
            Self::Update(_) => "update",
            Self::Prepare(_) => "prepare",
            Self::SetAutoCommit(_) => "set_auto_commit",
            Self::SetReadOnly(_) => "set_read_only",
            Self::SetIsolation(_) => "set_isolation",
            Self::SetCatalog(_) => "set_catalog",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Other(name) => name,
        }
    }

    /// SQL text carried by the operation, if any.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query(sql) | Self::Execute(sql) | Self::Update(sql) | Self::Prepare(sql) => {
                Some(sql)
            }
            _ => None,
        }
    }

    /// Whether the operation runs a statement on the server.
    #[must_use]
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Query(_) | Self::Execute(_) | Self::Update(_))
    }
}

/// Result of a call as seen by interceptors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Call completed successfully.
    Completed,
    /// Call was made and failed.
    Failed(String),
    /// Call was stopped by an interceptor before reaching the connection.
    Rejected {
        /// Name of the rejecting interceptor.
        interceptor: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl Outcome {
    /// Build a rejection on behalf of an interceptor.
    pub fn rejected(interceptor: &dyn Interceptor, reason: impl Into<String>) -> Self {
        Self::Rejected {
            interceptor: interceptor.name().to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the call completed successfully.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Remainder of the chain after the current interceptor.
pub struct Next<'a> {
    rest: &'a mut [Box<dyn Interceptor>],
    terminal: &'a mut (dyn FnMut(&Operation<'_>) -> Outcome + 'a),
}

impl Next<'_> {
    /// Pass the call to the next interceptor, or to the connection at the end of the chain.
    pub fn run(self, op: &Operation<'_>) -> Outcome {
        let Next { rest, terminal } = self;
        match rest.split_first_mut() {
            Some((head, rest)) => head.invoke(op, Next { rest, terminal }),
            None => terminal(op),
        }
    }
}

/// Session reset collected from the chain when a connection is returned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ResetRequest {
    /// Commit pending work.
    pub commit: bool,
    /// Roll back pending work.
    pub rollback: bool,
    /// Restore configured session defaults.
    pub restore: bool,
}

/// Interceptor chain owned by a single pooled resource.
#[derive(Clone, Debug, Default)]
pub(crate) struct InterceptorChain {
    links: Vec<Box<dyn Interceptor>>,
}

impl InterceptorChain {
    pub(crate) fn new(links: Vec<Box<dyn Interceptor>>) -> Self {
        Self { links }
    }

    pub(crate) fn bind(&mut self, binding: &Binding) {
        for link in &mut self.links {
            link.reset(Some(binding));
        }
    }

    pub(crate) fn unbind(&mut self) {
        for link in &mut self.links {
            link.reset(None);
        }
    }

    pub(crate) fn invoke(
        &mut self,
        op: &Operation<'_>,
        terminal: &mut dyn FnMut(&Operation<'_>) -> Outcome,
    ) -> Outcome {
        Next {
            rest: &mut self.links,
            terminal,
        }
        .run(op)
    }

    pub(crate) fn close_invoked(&mut self, reset: &mut ResetRequest) {
        for link in &mut self.links {
            link.close_invoked(reset);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[derive(Clone)]
    struct Recorder {
        tag: &'static str,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
        reject: bool,
    }

    impl Interceptor for Recorder {
        fn name(&self) -> &str {
            self.tag
        }

        fn invoke(&mut self, op: &Operation<'_>, next: Next<'_>) -> Outcome {
            self.log.lock().push(format!("{}>{}", self.tag, op.name()));
            if self.reject {
                return Outcome::rejected(self, "nope");
            }
            let res = next.run(op);
            self.log.lock().push(format!("{}<", self.tag));
            res
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn recorder(tag: &'static str, log: &Arc<parking_lot::Mutex<Vec<String>>>) -> Recorder {
        Recorder {
            tag,
            log: log.clone(),
            reject: false,
        }
    }

    #[test]
    fn chain_runs_in_order() {
        let log = Arc::default();
        let mut chain = InterceptorChain::new(vec![
            Box::new(recorder("a", &log)),
            Box::new(recorder("b", &log)),
        ]);
        let mut calls = 0;
        let out = chain.invoke(&Operation::Commit, &mut |_| {
            calls += 1;
            Outcome::Completed
        });
        assert_eq!(out, Outcome::Completed);
        assert_eq!(calls, 1);
        assert_eq!(*log.lock(), vec!["a>commit", "b>commit", "b<", "a<"]);
    }

    #[test]
    fn chain_short_circuits() {
        let log = Arc::default();
        let mut blocker = recorder("b", &log);
        blocker.reject = true;
        let mut chain =
            InterceptorChain::new(vec![Box::new(recorder("a", &log)), Box::new(blocker)]);
        let mut reached = false;
        let out = chain.invoke(&Operation::Query("SELECT 1"), &mut |_| {
            reached = true;
            Outcome::Completed
        });
        assert!(!reached);
        assert_eq!(
            out,
            Outcome::Rejected {
                interceptor: "b".into(),
                reason: "nope".into()
            }
        );
    }

    #[test]
    fn binding_operation_matching() {
        let resource = Arc::new(ResourceInfo::new(1, Instant::now()));
        let mut binding = Binding {
            pool: Arc::new(PoolInfo {
                name: "p".into(),
                use_equals: true,
                defaults: SessionDefaults::default(),
            }),
            resource,
        };
        let sql = String::from("SELECT 1");
        let query = Operation::Query(&sql);
        assert!(binding.matches(&query, &Operation::Query("SELECT 1")));
        assert!(!binding.matches(&query, &Operation::Query("SELECT 2")));
        assert!(!binding.matches(&query, &Operation::Execute("SELECT 1")));
        assert!(!binding.matches(&Operation::SetReadOnly(true), &Operation::SetReadOnly(false)));
        Arc::make_mut(&mut binding.pool).use_equals = false;
        assert!(binding.matches(&query, &Operation::Query("SELECT 2")));
        assert!(binding.matches(&Operation::SetReadOnly(true), &Operation::SetReadOnly(false)));
        assert!(binding.matches(&Operation::Commit, &Operation::Commit));
        assert!(!binding.matches(&Operation::Commit, &Operation::Rollback));
        assert!(!binding.matches(&query, &Operation::Prepare("SELECT 1")));
    }

    #[test]
    fn operation_sql() {
        assert_eq!(Operation::Update("DELETE").sql(), Some("DELETE"));
        assert!(Operation::Update("DELETE").is_execution());
        assert!(!Operation::Prepare("SELECT").is_execution());
        assert_eq!(Operation::Commit.sql(), None);
        assert_eq!(Operation::Other("ping").name(), "ping");
    }
}

use std::{
    any::Any,
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{debug, error, info, trace, warn, Level};

use crate::{
    config::{ConfigError, InterceptorSpec},
    interceptor::{Binding, Interceptor, Next, Operation, Outcome},
};

/// Logs every statement executed through the connection.
///
/// Properties: `logLevel` (default `info`), `prefix`, `suffix` and `json` (default `false`).
#[derive(Clone, Debug)]
pub struct QueryReport {
    level: Level,
    prefix: String,
    suffix: String,
    json: bool,
    binding: Option<Binding>,
}

impl Default for QueryReport {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            prefix: String::new(),
            suffix: String::new(),
            json: false,
            binding: None,
        }
    }
}

/// Single report line in JSON form.
#[derive(Serialize)]
struct Entry<'a> {
    pool: &'a str,
    resource: Option<u64>,
    operation: &'static str,
    query: &'a str,
    elapsed_ms: f64,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl QueryReport {
    /// Registered name.
    pub const NAME: &'static str = "QueryReport";
    /// Legacy name accepted in interceptor definitions.
    pub const ALIAS: &'static str = "QueryExecutionReport";

    /// Render a report line.
    #[must_use]
    pub fn render(&self, op: &Operation<'_>, elapsed: Duration, outcome: &Outcome) -> String {
        let query = op.sql().unwrap_or_default();
        let (status, detail) = match outcome {
            Outcome::Completed => ("completed", None),
            Outcome::Failed(error) => ("failed", Some(error.as_str())),
            Outcome::Rejected { reason, .. } => ("rejected", Some(reason.as_str())),
        };
        let body = if self.json {
            let entry = Entry {
                pool: self.binding.as_ref().map_or("", |b| b.pool.name.as_str()),
                resource: self.binding.as_ref().map(|b| b.resource.id()),
                operation: op.name(),
                query,
                elapsed_ms: elapsed.as_micros() as f64 / 1000.0,
                outcome: status,
                error: detail,
            };
            serde_json::to_string(&entry).unwrap_or_default()
        } else {
            match detail {
                Some(detail) => format!("{query} [{status} in {elapsed:?}: {detail}]"),
                None => format!("{query} [{status} in {elapsed:?}]"),
            }
        };
        format!("{}{body}{}", self.prefix, self.suffix)
    }
}

impl Interceptor for QueryReport {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, spec: &InterceptorSpec) -> Result<(), ConfigError> {
        if let Some(level) = spec.property("logLevel")? {
            self.level = level;
        }
        if let Some(prefix) = spec.properties.get("prefix") {
            self.prefix.clone_from(prefix);
        }
        if let Some(suffix) = spec.properties.get("suffix") {
            self.suffix.clone_from(suffix);
        }
        if let Some(json) = spec.property("json")? {
            self.json = json;
        }
        Ok(())
    }

    fn reset(&mut self, binding: Option<&Binding>) {
        self.binding = binding.cloned();
    }

    fn invoke(&mut self, op: &Operation<'_>, next: Next<'_>) -> Outcome {
        if op.sql().is_none() {
            return next.run(op);
        }
        let started = Instant::now();
        let outcome = next.run(op);
        let line = self.render(op, started.elapsed(), &outcome);
        match self.level {
            Level::TRACE => trace!(target: "tidepool::query", "{line}"),
            Level::DEBUG => debug!(target: "tidepool::query", "{line}"),
            Level::INFO => info!(target: "tidepool::query", "{line}"),
            Level::WARN => warn!(target: "tidepool::query", "{line}"),
            _ => error!(target: "tidepool::query", "{line}"),
        }
        outcome
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn configured(props: &[(&str, &str)]) -> QueryReport {
        let mut spec = InterceptorSpec::new(QueryReport::NAME);
        for (k, v) in props {
            spec = spec.with_property(*k, *v);
        }
        let mut report = QueryReport::default();
        report.configure(&spec).unwrap();
        report
    }

    #[test]
    fn plain_line_with_affixes() {
        let report = configured(&[("prefix", ">> "), ("suffix", " <<"), ("logLevel", "debug")]);
        assert_eq!(report.level, Level::DEBUG);
        let line = report.render(
            &Operation::Query("SELECT 1"),
            Duration::from_millis(5),
            &Outcome::Completed,
        );
        assert_eq!(line, ">> SELECT 1 [completed in 5ms] <<");
    }

    #[test]
    fn json_line() {
        let report = configured(&[("json", "true")]);
        let line = report.render(
            &Operation::Update("DELETE FROM t"),
            Duration::from_millis(2),
            &Outcome::Failed("locked".into()),
        );
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({
                "pool": "",
                "resource": null,
                "operation": "update",
                "query": "DELETE FROM t",
                "elapsed_ms": 2.0,
                "outcome": "failed",
                "error": "locked",
            })
        );
    }

    #[test]
    fn invalid_level() {
        let mut report = QueryReport::default();
        let res = report
            .configure(&InterceptorSpec::new(QueryReport::NAME).with_property("logLevel", "loud"));
        assert!(res.is_err());
    }
}

//! Connection pool configuration structures.

use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Pool configuration error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Configuration builder error.
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    /// Interceptor chain definition could not be parsed.
    #[error("malformed interceptor definition: {0}")]
    InterceptorSyntax(String),
    /// Interceptor name is not present in the registry.
    #[error("unknown interceptor: {0}")]
    UnknownInterceptor(String),
    /// Interceptor property has a value of the wrong type.
    #[error("invalid value `{value}` for property `{property}` of interceptor `{interceptor}`")]
    InvalidProperty {
        /// Interceptor name.
        interceptor: String,
        /// Property name.
        property: String,
        /// Offending value.
        value: String,
    },
}

/// Connection pool configuration.
///
/// All durations are written in [`humantime`](humantime_serde) format, like `30s` or `5m`.
/// Option names of the classic pool (`maxActive`, `testOnBorrow` and so on) are accepted as
/// aliases.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Pool name, used in logs and metric labels.
    ///
    /// Default is `default`.
    #[serde(default = "PoolConfig::default_name")]
    pub name: String,
    /// Parameters passed to the connection factory.
    #[serde(default)]
    pub connection: ConnectionProperties,
    /// Number of connections created when the pool starts.
    ///
    /// Default is 10.
    #[serde(default = "PoolConfig::default_initial_size", alias = "initialSize")]
    pub initial_size: usize,
    /// Maximum number of connections, busy and idle combined.
    ///
    /// Default is 100.
    #[serde(default = "PoolConfig::default_max_active", alias = "maxActive")]
    pub max_active: usize,
    /// Idle connections the evictor will never go below.
    ///
    /// Default is 10.
    #[serde(default = "PoolConfig::default_min_idle", alias = "minIdle")]
    pub min_idle: usize,
    /// Maximum number of idle connections kept on return.
    ///
    /// Default is 100.
    #[serde(default = "PoolConfig::default_max_idle", alias = "maxIdle")]
    pub max_idle: usize,
    /// How long a borrower waits for a connection. Zero means wait forever.
    ///
    /// Default is 30 seconds.
    #[serde(
        default = "PoolConfig::default_max_wait",
        alias = "maxWait",
        with = "humantime_serde"
    )]
    pub max_wait: Duration,
    /// Hand connections to blocked borrowers in strict arrival order.
    ///
    /// Default is `false`.
    #[serde(default, alias = "fairQueue")]
    pub fair_queue: bool,
    /// Validate connections before lending them.
    #[serde(default, alias = "testOnBorrow")]
    pub test_on_borrow: bool,
    /// Validate connections when they are returned.
    #[serde(default, alias = "testOnReturn")]
    pub test_on_return: bool,
    /// Validate idle connections from the background sweeper.
    #[serde(default, alias = "testWhileIdle")]
    pub test_while_idle: bool,
    /// Validate connections right after they are established.
    #[serde(default, alias = "testOnConnect")]
    pub test_on_connect: bool,
    /// Query handed to the factory when validating a connection.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "validationQuery"
    )]
    pub validation_query: Option<String>,
    /// Skip validation of connections that were validated within this interval.
    ///
    /// Default is 30 seconds.
    #[serde(
        default = "PoolConfig::default_validation_interval",
        alias = "validationInterval",
        with = "humantime_serde"
    )]
    pub validation_interval: Duration,
    /// Statement executed once on every new connection.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "initSQL")]
    pub init_sql: Option<String>,
    /// Interval between background sweeper runs. Zero disables the sweeper.
    ///
    /// Default is 5 seconds.
    #[serde(
        default = "PoolConfig::default_time_between_eviction_runs",
        alias = "timeBetweenEvictionRunsMillis",
        with = "humantime_serde"
    )]
    pub time_between_eviction_runs: Duration,
    /// Number of idle connections examined per sweeper run.
    ///
    /// Zero examines every idle connection, a negative value `-n` examines `1/n` of them.
    #[serde(default, alias = "numTestsPerEvictionRun")]
    pub num_tests_per_eviction_run: i32,
    /// Minimum time a connection may sit idle before it is eligible for eviction.
    ///
    /// Default is 60 seconds.
    #[serde(
        default = "PoolConfig::default_min_evictable_idle",
        alias = "minEvictableIdleTimeMillis",
        with = "humantime_serde"
    )]
    pub min_evictable_idle: Duration,
    /// Reclaim connections that were borrowed for longer than
    /// [`Self::remove_abandoned_timeout`].
    #[serde(default, alias = "removeAbandoned")]
    pub remove_abandoned: bool,
    /// Time after which a busy connection is considered abandoned.
    ///
    /// Default is 60 seconds.
    #[serde(
        default = "PoolConfig::default_remove_abandoned_timeout",
        alias = "removeAbandonedTimeout",
        with = "humantime_serde"
    )]
    pub remove_abandoned_timeout: Duration,
    /// Only reclaim abandoned connections when the pool is at least this full, in percent.
    ///
    /// Zero reclaims regardless of pool usage.
    #[serde(default, alias = "abandonWhenPercentageFull")]
    pub abandon_when_percentage_full: u8,
    /// Log borrow-time call traces of reclaimed and suspect connections.
    #[serde(default, alias = "logAbandoned")]
    pub log_abandoned: bool,
    /// Report busy connections held longer than this, without reclaiming them. Zero disables.
    #[serde(default, alias = "suspectTimeout", with = "humantime_serde")]
    pub suspect_timeout: Duration,
    /// Close connections older than this when they are returned or swept. Zero disables.
    #[serde(default, alias = "maxAge", with = "humantime_serde")]
    pub max_age: Duration,
    /// Ordered interceptor chain.
    #[serde(
        default,
        skip_serializing_if = "InterceptorList::is_empty",
        alias = "jdbcInterceptors"
    )]
    pub interceptors: InterceptorList,
    /// Match operations by value, arguments included, rather than by kind when custom
    /// interceptors compare them through [`Binding::matches`].
    ///
    /// Default is `true`.
    ///
    /// [`Binding::matches`]: crate::interceptor::Binding::matches
    #[serde(default = "PoolConfig::default_use_equals", alias = "useEquals")]
    pub use_equals: bool,
    /// Commit pending work when a connection is returned.
    #[serde(default, alias = "commitOnReturn")]
    pub commit_on_return: bool,
    /// Roll back pending work when a connection is returned.
    #[serde(default, alias = "rollbackOnReturn")]
    pub rollback_on_return: bool,
    /// Session defaults restored by the `ConnectionState` interceptor.
    #[serde(default, flatten)]
    pub defaults: SessionDefaults,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            connection: ConnectionProperties::default(),
            initial_size: Self::default_initial_size(),
            max_active: Self::default_max_active(),
            min_idle: Self::default_min_idle(),
            max_idle: Self::default_max_idle(),
            max_wait: Self::default_max_wait(),
            fair_queue: false,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            test_on_connect: false,
            validation_query: None,
            validation_interval: Self::default_validation_interval(),
            init_sql: None,
            time_between_eviction_runs: Self::default_time_between_eviction_runs(),
            num_tests_per_eviction_run: 0,
            min_evictable_idle: Self::default_min_evictable_idle(),
            remove_abandoned: false,
            remove_abandoned_timeout: Self::default_remove_abandoned_timeout(),
            abandon_when_percentage_full: 0,
            log_abandoned: false,
            suspect_timeout: Duration::ZERO,
            max_age: Duration::ZERO,
            interceptors: InterceptorList::default(),
            use_equals: Self::default_use_equals(),
            commit_on_return: false,
            rollback_on_return: false,
            defaults: SessionDefaults::default(),
        }
    }
}

impl PoolConfig {
    /// Create builder for pool configuration.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Default value for [`Self::name`].
    #[must_use]
    #[inline]
    fn default_name() -> String {
        String::from("default")
    }

    /// Default value for [`Self::initial_size`].
    #[must_use]
    #[inline]
    fn default_initial_size() -> usize {
        10
    }

    /// Default value for [`Self::max_active`].
    #[must_use]
    #[inline]
    fn default_max_active() -> usize {
        100
    }

    /// Default value for [`Self::min_idle`].
    #[must_use]
    #[inline]
    fn default_min_idle() -> usize {
        10
    }

    /// Default value for [`Self::max_idle`].
    #[must_use]
    #[inline]
    fn default_max_idle() -> usize {
        100
    }

    /// Default value for [`Self::max_wait`].
    #[must_use]
    #[inline]
    fn default_max_wait() -> Duration {
        Duration::from_secs(30)
    }

    /// Default value for [`Self::validation_interval`].
    #[must_use]
    #[inline]
    fn default_validation_interval() -> Duration {
        Duration::from_secs(30)
    }

    /// Default value for [`Self::time_between_eviction_runs`].
    #[must_use]
    #[inline]
    fn default_time_between_eviction_runs() -> Duration {
        Duration::from_secs(5)
    }

    /// Default value for [`Self::min_evictable_idle`].
    #[must_use]
    #[inline]
    fn default_min_evictable_idle() -> Duration {
        Duration::from_secs(60)
    }

    /// Default value for [`Self::remove_abandoned_timeout`].
    #[must_use]
    #[inline]
    fn default_remove_abandoned_timeout() -> Duration {
        Duration::from_secs(60)
    }

    /// Default value for [`Self::use_equals`].
    #[must_use]
    #[inline]
    fn default_use_equals() -> bool {
        true
    }

    /// Set pool name.
    pub fn with_name(&mut self, name: impl ToString) -> &mut Self {
        self.name = name.to_string();
        self
    }

    /// Set capacity bounds in one go.
    pub fn with_capacity(
        &mut self,
        initial_size: usize,
        min_idle: usize,
        max_idle: usize,
        max_active: usize,
    ) -> &mut Self {
        self.initial_size = initial_size;
        self.min_idle = min_idle;
        self.max_idle = max_idle;
        self.max_active = max_active;
        self
    }

    /// Effective wait budget of a blocking borrow, [`None`] meaning forever.
    #[must_use]
    pub fn wait_budget(&self) -> Option<Duration> {
        (!self.max_wait.is_zero()).then_some(self.max_wait)
    }

    /// Whether the background sweeper has any work to do with this configuration.
    #[must_use]
    pub fn is_sweeper_enabled(&self) -> bool {
        if self.time_between_eviction_runs.is_zero() {
            return false;
        }
        (self.remove_abandoned && !self.remove_abandoned_timeout.is_zero())
            || (self.test_while_idle && self.validation_query.is_some())
            || !self.suspect_timeout.is_zero()
            || !self.min_evictable_idle.is_zero()
    }

    /// Whether borrowers' call traces need to be captured.
    #[must_use]
    pub fn is_trace_enabled(&self) -> bool {
        self.log_abandoned || !self.suspect_timeout.is_zero()
    }

    /// Bring inconsistent bounds into order.
    ///
    /// Never fails: every correction is reported as a warning.
    pub(crate) fn sanitize(&mut self) {
        if self.max_active == 0 {
            warn!(pool = %self.name, "max_active is zero, setting max_active to 1");
            self.max_active = 1;
        }
        if self.initial_size > self.max_active {
            warn!(
                pool = %self.name,
                "initial_size is larger than max_active, setting initial_size to {}",
                self.max_active
            );
            self.initial_size = self.max_active;
        }
        if self.min_idle > self.max_active {
            warn!(
                pool = %self.name,
                "min_idle is larger than max_active, setting min_idle to {}",
                self.max_active
            );
            self.min_idle = self.max_active;
        }
        if self.max_idle > self.max_active {
            warn!(
                pool = %self.name,
                "max_idle is larger than max_active, setting max_idle to {}",
                self.max_active
            );
            self.max_idle = self.max_active;
        }
        if self.max_idle < self.min_idle {
            warn!(
                pool = %self.name,
                "max_idle is smaller than min_idle, setting max_idle to {}",
                self.min_idle
            );
            self.max_idle = self.min_idle;
        }
        if self.abandon_when_percentage_full > 100 {
            warn!(
                pool = %self.name,
                "abandon_when_percentage_full is above 100, setting it to 100"
            );
            self.abandon_when_percentage_full = 100;
        }
        if !self.time_between_eviction_runs.is_zero()
            && self.time_between_eviction_runs < Duration::from_secs(1)
        {
            warn!(
                pool = %self.name,
                interval = ?self.time_between_eviction_runs,
                "sweeper interval is set to lower than 1 second"
            );
        }
    }
}

/// Builder for pool configuration.
#[must_use]
pub struct PoolConfigBuilder {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl PoolConfigBuilder {
    /// Alternative method to construct a pool configuration builder.
    pub fn new() -> Self {
        Self {
            builder: config::Config::builder(),
        }
    }

    /// Try to build configuration object from preconfigured sources.
    ///
    /// This method will do all the I/O necessary to load the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Err` if some configuration loading was unsuccessful.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        self.builder.build()?.try_deserialize().map_err(Into::into)
    }

    /// Add a custom object implementing [`Source`] trait as a source of pool configuration.
    ///
    /// [`Source`]: config::Source
    pub fn with_source<T>(mut self, source: T) -> Self
    where
        T: config::Source + Send + Sync + 'static,
    {
        self.builder = self.builder.add_source(source);
        self
    }

    /// Add file as a source of pool configuration.
    pub fn with_file(self, name: impl AsRef<str>) -> Self {
        self.with_source(config::File::with_name(name.as_ref()))
    }

    /// Add in-memory YAML document as a source of pool configuration.
    pub fn with_yaml(self, document: impl AsRef<str>) -> Self {
        self.with_source(config::File::from_str(
            document.as_ref(),
            config::FileFormat::Yaml,
        ))
    }

    /// Add environment variables as a source of pool configuration.
    ///
    /// Nested keys are separated by a double underscore, as in `POOL__CONNECTION__URL`.
    pub fn with_env(self, prefix: impl AsRef<str>) -> Self {
        self.with_source(
            config::Environment::with_prefix(prefix.as_ref())
                .separator("__")
                .prefix_separator("__"),
        )
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters the connection factory uses to open physical connections.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct ConnectionProperties {
    /// Database URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// User name.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "user")]
    pub username: Option<String>,
    /// Password.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Extra driver-specific properties.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        alias = "connectionProperties"
    )]
    pub properties: BTreeMap<String, String>,
}

impl ConnectionProperties {
    /// Create connection properties for a database URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// Transaction isolation level.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Isolation {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is visible.
    ReadCommitted,
    /// Rows read once stay stable.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

/// Session properties a returned connection is brought back to.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct SessionDefaults {
    /// Default auto-commit mode.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "default_auto_commit",
        alias = "defaultAutoCommit"
    )]
    pub auto_commit: Option<bool>,
    /// Default read-only mode.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "default_read_only",
        alias = "defaultReadOnly"
    )]
    pub read_only: Option<bool>,
    /// Default transaction isolation.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "default_transaction_isolation",
        alias = "defaultTransactionIsolation"
    )]
    pub isolation: Option<Isolation>,
    /// Default catalog.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "default_catalog",
        alias = "defaultCatalog"
    )]
    pub catalog: Option<String>,
}

impl SessionDefaults {
    /// Whether any default is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.auto_commit.is_none()
            && self.read_only.is_none()
            && self.isolation.is_none()
            && self.catalog.is_none()
    }
}

/// Definition of a single interceptor in the chain.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub struct InterceptorSpec {
    /// Registered interceptor name.
    pub name: String,
    /// Interceptor-specific properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl InterceptorSpec {
    /// Create interceptor definition without properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Add a property to the definition.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Parse a property into the requested type.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the property is present but cannot be parsed.
    pub fn property<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        match self.properties.get(name) {
            None => Ok(None),
            Some(value) => value.trim().parse().map(Some).map_err(|_| {
                ConfigError::InvalidProperty {
                    interceptor: self.name.clone(),
                    property: name.to_string(),
                    value: value.clone(),
                }
            }),
        }
    }
}

impl fmt::Display for InterceptorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.properties.is_empty() {
            f.write_str("(")?;
            for (idx, (key, value)) in self.properties.iter().enumerate() {
                if idx > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{key}={value}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Ordered list of interceptor definitions.
///
/// Accepts either a structured list or the compact text form
/// `Name(key=value,key2=value2);OtherName`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "InterceptorListRepr", into = "InterceptorListRepr")]
pub struct InterceptorList(pub Vec<InterceptorSpec>);

impl InterceptorList {
    /// Whether the list contains no interceptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over interceptor definitions.
    pub fn iter(&self) -> impl Iterator<Item = &InterceptorSpec> {
        self.0.iter()
    }
}

impl FromStr for InterceptorList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut specs = Vec::new();
        for item in s.split(';').map(str::trim).filter(|i| !i.is_empty()) {
            let spec = match (item.find('('), item.rfind(')')) {
                (None, None) => InterceptorSpec::new(item),
                (Some(open), Some(close)) if close == item.len() - 1 && open < close => {
                    let name = item[..open].trim();
                    if name.is_empty() {
                        return Err(ConfigError::InterceptorSyntax(item.to_string()));
                    }
                    let mut spec = InterceptorSpec::new(name);
                    for prop in item[open + 1..close]
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                    {
                        let (key, value) = prop
                            .split_once('=')
                            .ok_or_else(|| ConfigError::InterceptorSyntax(item.to_string()))?;
                        spec.properties
                            .insert(key.trim().to_string(), value.trim().to_string());
                    }
                    spec
                }
                _ => return Err(ConfigError::InterceptorSyntax(item.to_string())),
            };
            specs.push(spec);
        }
        Ok(Self(specs))
    }
}

impl fmt::Display for InterceptorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, spec) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(";")?;
            }
            spec.fmt(f)?;
        }
        Ok(())
    }
}

/// Serialized forms of [`InterceptorList`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum InterceptorListRepr {
    /// Compact text form.
    Text(String),
    /// Structured list.
    List(Vec<InterceptorSpec>),
}

impl TryFrom<InterceptorListRepr> for InterceptorList {
    type Error = ConfigError;

    fn try_from(value: InterceptorListRepr) -> Result<Self, Self::Error> {
        match value {
            InterceptorListRepr::Text(text) => text.parse(),
            InterceptorListRepr::List(list) => Ok(Self(list)),
        }
    }
}

impl From<InterceptorList> for InterceptorListRepr {
    fn from(value: InterceptorList) -> Self {
        Self::List(value.0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{from_value, json, to_value};

    use super::*;

    /// Deserialize - empty document yields defaults.
    #[test]
    fn config_de_default() {
        let config: PoolConfig = from_value(json!({})).unwrap();
        assert_eq!(config, PoolConfig::default());
        assert_eq!(config.wait_budget(), Some(Duration::from_secs(30)));
        assert!(config.is_sweeper_enabled());
    }

    /// Deserialize - classic option names and humantime durations.
    #[test]
    fn config_de_aliases() {
        let config: PoolConfig = from_value(json!({
            "name": "orders",
            "maxActive": 4,
            "minIdle": 1,
            "maxIdle": 2,
            "initialSize": 2,
            "maxWait": "250ms",
            "fairQueue": true,
            "testOnBorrow": true,
            "validationQuery": "SELECT 1",
            "removeAbandoned": true,
            "removeAbandonedTimeout": "2m",
            "defaultAutoCommit": false,
            "defaultTransactionIsolation": "read_committed",
        }))
        .unwrap();
        assert_eq!(config.name, "orders");
        assert_eq!(config.max_active, 4);
        assert_eq!(config.min_idle, 1);
        assert_eq!(config.max_idle, 2);
        assert_eq!(config.max_wait, Duration::from_millis(250));
        assert!(config.fair_queue);
        assert!(config.test_on_borrow);
        assert_eq!(config.validation_query.as_deref(), Some("SELECT 1"));
        assert_eq!(config.remove_abandoned_timeout, Duration::from_secs(120));
        assert_eq!(config.defaults.auto_commit, Some(false));
        assert_eq!(config.defaults.isolation, Some(Isolation::ReadCommitted));
    }

    /// Zero wait means waiting forever.
    #[test]
    fn config_zero_wait_is_unbounded() {
        let config: PoolConfig = from_value(json!({ "max_wait": "0s" })).unwrap();
        assert_eq!(config.wait_budget(), None);
    }

    /// Out-of-order bounds are clamped, never rejected.
    #[test]
    fn config_sanitize_clamps() {
        let mut config = PoolConfig::default();
        config.with_capacity(20, 15, 8, 10);
        config.abandon_when_percentage_full = 150;
        config.sanitize();
        assert_eq!(config.initial_size, 10);
        assert_eq!(config.min_idle, 10);
        assert_eq!(config.max_idle, 10);
        assert_eq!(config.max_active, 10);
        assert_eq!(config.abandon_when_percentage_full, 100);

        let mut config = PoolConfig::default();
        config.with_capacity(0, 0, 0, 0);
        config.sanitize();
        assert_eq!(config.max_active, 1);
    }

    /// Sweeper needs an interval and something to do.
    #[test]
    fn config_sweeper_enablement() {
        let mut config = PoolConfig::default();
        config.min_evictable_idle = Duration::ZERO;
        assert!(!config.is_sweeper_enabled());
        config.test_while_idle = true;
        assert!(!config.is_sweeper_enabled());
        config.validation_query = Some("SELECT 1".into());
        assert!(config.is_sweeper_enabled());
        config.time_between_eviction_runs = Duration::ZERO;
        assert!(!config.is_sweeper_enabled());
    }

    /// Compact interceptor definitions.
    #[test]
    fn interceptors_parse_text() {
        let list: InterceptorList =
            "ConnectionState; SlowQueryReport(threshold=50, maxQueries=10);ResetAbandonedTimer"
                .parse()
                .unwrap();
        assert_eq!(list.0.len(), 3);
        assert_eq!(list.0[0], InterceptorSpec::new("ConnectionState"));
        assert_eq!(
            list.0[1],
            InterceptorSpec::new("SlowQueryReport")
                .with_property("threshold", "50")
                .with_property("maxQueries", "10")
        );
        assert_eq!(list.0[1].property::<u64>("threshold").unwrap(), Some(50));
        assert_eq!(list.0[1].property::<u64>("missing").unwrap(), None);
        assert!(list.0[1].property::<bool>("threshold").is_err());
        assert_eq!(
            list.to_string(),
            "ConnectionState;SlowQueryReport(maxQueries=10,threshold=50);ResetAbandonedTimer"
        );
    }

    /// Malformed interceptor definitions.
    #[test]
    fn interceptors_parse_invalid() {
        assert!("Broken(threshold=1".parse::<InterceptorList>().is_err());
        assert!("(a=b)".parse::<InterceptorList>().is_err());
        assert!("Name(novalue)".parse::<InterceptorList>().is_err());
        assert!("".parse::<InterceptorList>().unwrap().is_empty());
    }

    /// Interceptors accept both text and structured forms.
    #[test]
    fn interceptors_de_both_forms() {
        let text: PoolConfig =
            from_value(json!({ "jdbcInterceptors": "QueryReport(json=true)" })).unwrap();
        let list: PoolConfig = from_value(json!({
            "interceptors": [{ "name": "QueryReport", "properties": { "json": "true" } }]
        }))
        .unwrap();
        assert_eq!(text.interceptors, list.interceptors);
        let serialized = to_value(&text).unwrap();
        assert_eq!(
            serialized["interceptors"],
            json!([{ "name": "QueryReport", "properties": { "json": "true" } }])
        );
    }

    /// Loading through the configuration builder.
    #[test]
    fn builder_yaml() {
        let config = PoolConfig::builder()
            .with_yaml(
                r#"
name: reports
max_active: 3
min_idle: 0
max_wait: 100ms
connection:
  url: "mem://reports"
  username: reader
interceptors: "ErrorTrap;ResetAbandonedTimer"
"#,
            )
            .build()
            .unwrap();
        assert_eq!(config.name, "reports");
        assert_eq!(config.max_active, 3);
        assert_eq!(config.max_wait, Duration::from_millis(100));
        assert_eq!(config.connection.url.as_deref(), Some("mem://reports"));
        assert_eq!(config.connection.username.as_deref(), Some("reader"));
        assert_eq!(config.interceptors.0.len(), 2);
    }

    /// Password never leaks into serialized output.
    #[test]
    fn connection_password_not_serialized() {
        let mut props = ConnectionProperties::new("mem://x");
        props.password = Some("secret".into());
        let value = to_value(&props).unwrap();
        assert_eq!(value, json!({ "url": "mem://x" }));
    }
}

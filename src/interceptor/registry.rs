use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    config::{ConfigError, InterceptorList, InterceptorSpec},
    interceptor::{
        ConnectionState, ErrorTrap, Interceptor, QueryReport, ResetAbandonedTimer,
        SlowQueryReport,
    },
};

type Constructor = Arc<dyn Fn() -> Box<dyn Interceptor> + Send + Sync>;

/// Name-to-constructor map used to instantiate configured interceptor chains.
///
/// The default registry knows every built-in interceptor.
#[derive(Clone)]
pub struct InterceptorRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for InterceptorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(ErrorTrap::NAME, || Box::<ErrorTrap>::default())
            .register(ErrorTrap::ALIAS, || Box::<ErrorTrap>::default())
            .register(ConnectionState::NAME, || Box::<ConnectionState>::default())
            .register(ResetAbandonedTimer::NAME, || {
                Box::<ResetAbandonedTimer>::default()
            })
            .register(SlowQueryReport::NAME, || Box::<SlowQueryReport>::default())
            .register(QueryReport::NAME, || Box::<QueryReport>::default())
            .register(QueryReport::ALIAS, || Box::<QueryReport>::default());
        registry
    }
}

impl fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("InterceptorRegistry")
            .field("names", &names)
            .finish()
    }
}

impl InterceptorRegistry {
    /// Registry without any interceptors, not even the built-in ones.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register an interceptor constructor under a name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Interceptor> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Whether an interceptor is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Instantiate and configure a single interceptor.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the name is unknown or some property is invalid.
    pub fn instantiate(&self, spec: &InterceptorSpec) -> Result<Box<dyn Interceptor>, ConfigError> {
        let constructor = self
            .constructors
            .get(&spec.name)
            .ok_or_else(|| ConfigError::UnknownInterceptor(spec.name.clone()))?;
        let mut interceptor = constructor();
        interceptor.configure(spec)?;
        Ok(interceptor)
    }

    /// Instantiate a whole chain.
    ///
    /// The error trap always comes first: it is moved to the front if listed, or added
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Err` if any interceptor cannot be instantiated.
    pub fn build(&self, list: &InterceptorList) -> Result<Vec<Box<dyn Interceptor>>, ConfigError> {
        let is_trap = |spec: &&InterceptorSpec| {
            spec.name == ErrorTrap::NAME || spec.name == ErrorTrap::ALIAS
        };
        let trap = match list.iter().find(is_trap) {
            Some(spec) => self.instantiate(spec)?,
            None => Box::<ErrorTrap>::default(),
        };
        let mut chain = vec![trap];
        for spec in list.iter().filter(|s| !is_trap(s)) {
            chain.push(self.instantiate(spec)?);
        }
        Ok(chain)
    }
}

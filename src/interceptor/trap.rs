use std::any::Any;

use tracing::warn;

use crate::interceptor::{Binding, Interceptor, Next, Operation, Outcome};

/// Logs every failed call together with the identity of the resource it was made on.
///
/// Always the first link of a chain.
#[derive(Clone, Debug, Default)]
pub struct ErrorTrap {
    binding: Option<Binding>,
}

impl ErrorTrap {
    /// Registered name.
    pub const NAME: &'static str = "ErrorTrap";
    /// Legacy name accepted in interceptor definitions.
    pub const ALIAS: &'static str = "TrapException";
}

impl Interceptor for ErrorTrap {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn reset(&mut self, binding: Option<&Binding>) {
        self.binding = binding.cloned();
    }

    fn invoke(&mut self, op: &Operation<'_>, next: Next<'_>) -> Outcome {
        let outcome = next.run(op);
        if let Outcome::Failed(error) = &outcome {
            match &self.binding {
                Some(binding) => warn!(
                    pool = %binding.pool.name,
                    resource = binding.resource.id(),
                    age = ?binding.resource.age(),
                    operation = op.name(),
                    %error,
                    "connection call failed"
                ),
                None => warn!(operation = op.name(), %error, "connection call failed"),
            }
        }
        outcome
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

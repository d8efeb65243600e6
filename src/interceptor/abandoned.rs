use std::any::Any;

use crate::interceptor::{Binding, Interceptor, Next, Operation, Outcome};

/// Refreshes the last-touched time of the resource on every call, so that connections in
/// active use are never reclaimed as abandoned.
#[derive(Clone, Debug, Default)]
pub struct ResetAbandonedTimer {
    binding: Option<Binding>,
}

impl ResetAbandonedTimer {
    /// Registered name.
    pub const NAME: &'static str = "ResetAbandonedTimer";
}

impl Interceptor for ResetAbandonedTimer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn reset(&mut self, binding: Option<&Binding>) {
        self.binding = binding.cloned();
    }

    fn invoke(&mut self, op: &Operation<'_>, next: Next<'_>) -> Outcome {
        if let Some(binding) = &self.binding {
            binding.resource.touch();
        }
        let outcome = next.run(op);
        if let Some(binding) = &self.binding {
            binding.resource.touch();
        }
        outcome
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

use std::fmt;

use thiserror::Error;

/// Position of a breaker in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow to the dependency while failures are tracked.
    Closed,
    /// Calls are rejected without touching the dependency.
    Open,
    /// A sample of calls probes whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a guarded call that did not produce a value.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker refused the call; the operation was never invoked.
    #[error("circuit breaker `{breaker}` is {state}, call bypassed")]
    Bypass { breaker: String, state: CircuitState },
    /// The operation ran and failed with a monitored error.
    #[error("call guarded by circuit breaker `{breaker}` failed: {source}")]
    Failure {
        breaker: String,
        #[source]
        source: E,
    },
    /// The operation failed with an error the breaker does not watch.
    #[error(transparent)]
    Unmonitored(E),
}

impl<E> BreakerError<E> {
    pub fn is_bypass(&self) -> bool {
        matches!(self, BreakerError::Bypass { .. })
    }

    /// The error produced by the operation, if it was invoked.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Bypass { .. } => None,
            BreakerError::Failure { source, .. } | BreakerError::Unmonitored(source) => {
                Some(source)
            }
        }
    }
}

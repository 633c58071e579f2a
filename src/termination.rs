use serde::{Deserialize, Serialize};

/// Reason why a worker stopped executing, or why a single script
/// execution failed.
///
/// `Terminated` is not a fault: it is the unwind signal raised by the
/// termination guard after `force_terminate()`, and is never stored as a
/// worker's exception. Everything else is a genuine failure surfaced via
/// `Worker::exception()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    // === Script errors (userland) ===
    /// A script or message-handler invocation raised an error.
    Exception(String),

    // === Engine signals ===
    /// Execution was unwound because forced termination was requested.
    Terminated,

    // === Setup errors (host-side) ===
    /// The runtime could not be created or configured. Fatal to the
    /// worker instance; there is no retry inside the core.
    InitializationError(String),

    /// Unexpected error.
    Other(String),
}

impl TerminationReason {
    /// Returns true if this is a script (or handler) failure.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    /// Returns true if this is the forced-termination unwind, i.e.
    /// expected control flow rather than a fault.
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns true if the runtime failed before any script ran.
    pub fn is_setup_error(&self) -> bool {
        matches!(self, Self::InitializationError(_))
    }

    /// Get a human-readable description
    pub fn description(&self) -> &str {
        match self {
            Self::Exception(msg) => msg,
            Self::Terminated => "Execution terminated by request",
            Self::InitializationError(msg) => msg,
            Self::Other(msg) => msg,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for TerminationReason {}

/// Error returned by `Worker::start()`.
#[derive(Debug)]
pub enum StartError {
    /// `start()` was called more than once. Workers are single-use:
    /// once started they run their state machine to `Terminated` and
    /// cannot be restarted.
    AlreadyStarted,

    /// The dedicated thread could not be spawned.
    Spawn(std::io::Error),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "worker already started"),
            Self::Spawn(e) => write!(f, "failed to spawn worker thread: {e}"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            Self::AlreadyStarted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_is_not_an_exception() {
        assert!(TerminationReason::Terminated.is_termination());
        assert!(!TerminationReason::Terminated.is_exception());
        assert!(TerminationReason::Exception("boom".into()).is_exception());
        assert!(!TerminationReason::Exception("boom".into()).is_termination());
    }

    #[test]
    fn description_round_trips_message() {
        let r = TerminationReason::InitializationError("no isolate".into());
        assert!(r.is_setup_error());
        assert_eq!(r.description(), "no isolate");
        assert_eq!(r.to_string(), "no isolate");
    }
}

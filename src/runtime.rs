use crate::TerminationReason;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Name under which the termination guard is installed in every runtime.
///
/// The worker prepends a call to this function to every script it
/// executes, so a script that never yields control voluntarily still
/// observes forced termination at the next statement boundary. The name
/// is reserved by the engine; scripts must not redefine it.
pub const TERMINATION_GUARD_FN: &str = "__scriptworker_check_terminate";

/// Callback type for the termination guard.
///
/// Invoked implicitly at the start of every executed script (and at any
/// extra checkpoints a runtime adds, e.g. loop-back edges). Returns
/// `Err(TerminationReason::Terminated)` once forced termination has been
/// requested; the runtime must let that error unwind the in-flight
/// `execute`/`call_function` call.
pub type TerminationCheck = Arc<dyn Fn() -> Result<(), TerminationReason> + Send + Sync>;

/// Host function callable from script code, taking string arguments.
pub type HostFn = Box<dyn FnMut(&[String])>;

/// Handle for aborting in-flight execution from another thread.
///
/// Obtained from a runtime once, before any script runs, and held by the
/// worker so `force_terminate()` can interrupt a script that is between
/// guard checkpoints. Aborting an idle or already-aborted runtime is a
/// no-op.
pub trait AbortHandle: Send + Sync {
    fn abort(&self);
}

/// An isolated script execution context.
///
/// This is the boundary with the embedded script engine; the core treats
/// it as an opaque capability. Implementations typically wrap a
/// thread-local engine context and are therefore not `Send` - the worker
/// creates the runtime on its own thread via a [`RuntimeFactory`] and
/// never lets it escape. Dropping the runtime releases the context and
/// everything it holds.
pub trait ScriptRuntime {
    /// Install the termination guard under the given (engine-reserved)
    /// name. Called once, before any script executes.
    fn register_guard(
        &mut self,
        name: &str,
        check: TerminationCheck,
    ) -> Result<(), TerminationReason>;

    /// Register a named host function callable from script code.
    fn register_host_fn(&mut self, name: &str, f: HostFn) -> Result<(), TerminationReason>;

    /// Execute script text and return the produced value, if any.
    fn execute(&mut self, source: &str) -> Result<Option<JsonValue>, TerminationReason>;

    /// Invoke a script-defined function with the given arguments, in order.
    fn call_function(&mut self, name: &str, args: &[String]) -> Result<(), TerminationReason>;

    /// Get a handle that can abort in-flight execution from any thread.
    fn abort_handle(&self) -> Arc<dyn AbortHandle>;
}

/// Factory producing a runtime on the worker's own thread.
///
/// The factory is `Send` (it crosses into the spawned thread once); the
/// runtime it creates does not have to be.
pub trait RuntimeFactory: Send {
    fn create(&mut self) -> Result<Box<dyn ScriptRuntime>, TerminationReason>;
}

impl<F> RuntimeFactory for F
where
    F: FnMut() -> Result<Box<dyn ScriptRuntime>, TerminationReason> + Send,
{
    fn create(&mut self) -> Result<Box<dyn ScriptRuntime>, TerminationReason> {
        self()
    }
}

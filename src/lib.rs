//! Scripted-task worker engine
//!
//! Runs externally supplied script payloads on dedicated worker threads,
//! each bound to an isolated execution runtime, with cooperative and
//! forced cancellation, result/exception capture, and an asynchronous
//! mailbox for delivering follow-up messages to long-running workers.
//!
//! The script engine itself is an external collaborator behind the
//! [`ScriptRuntime`] trait; this crate provides the worker lifecycle,
//! the cancellation plumbing (the termination guard injected into every
//! executed script), and the supervisor boundary.

mod log;
mod mailbox;
mod payload;
mod runtime;
mod supervisor;
mod termination;
mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use log::{LogEvent, LogLevel, LogSender};
pub use mailbox::{Mailbox, Message};
pub use payload::Payload;
pub use runtime::{
    AbortHandle, HostFn, RuntimeFactory, ScriptRuntime, TERMINATION_GUARD_FN, TerminationCheck,
};
pub use supervisor::{Supervisor, WorkerKey};
pub use termination::{StartError, TerminationReason};
pub use worker::{Worker, WorkerState};

//! Stub runtime for exercising workers without a real script engine.
//!
//! Scripts are interpreted line by line as directives:
//!
//! - `value:<json>` — produce the parsed JSON value
//! - `fail:<msg>`   — raise an execution failure with that message
//! - `print:<msg>`  — invoke the `print` host function with the message
//! - `spin`         — loop forever, calling the termination guard between
//!   iterations (an interruptible infinite loop)
//! - anything else  — produce the line itself as a string value
//!
//! Handler invocations are recorded on the factory's [`RuntimeProbe`];
//! an invocation whose first argument is `boom` fails, for testing the
//! handler-failure path.

use crate::runtime::{AbortHandle, HostFn, RuntimeFactory, ScriptRuntime, TerminationCheck};
use crate::TerminationReason;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Observation side of a [`StubRuntimeFactory`]: counts context
/// releases and records handler invocations across every runtime the
/// factory created.
#[derive(Clone, Default)]
pub struct RuntimeProbe {
    releases: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl RuntimeProbe {
    /// How many runtime contexts have been released (dropped).
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Recorded `(function name, arguments)` handler invocations, in
    /// dispatch order.
    pub fn handler_calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Factory producing [`StubRuntime`]s that share one probe.
#[derive(Clone, Default)]
pub struct StubRuntimeFactory {
    probe: RuntimeProbe,
    fail_create: bool,
}

impl StubRuntimeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose `create` always fails, for testing setup-failure
    /// handling.
    pub fn failing() -> Self {
        Self {
            probe: RuntimeProbe::default(),
            fail_create: true,
        }
    }

    pub fn probe(&self) -> RuntimeProbe {
        self.probe.clone()
    }
}

impl RuntimeFactory for StubRuntimeFactory {
    fn create(&mut self) -> Result<Box<dyn ScriptRuntime>, TerminationReason> {
        if self.fail_create {
            return Err(TerminationReason::InitializationError(
                "stub runtime unavailable".into(),
            ));
        }
        Ok(Box::new(StubRuntime {
            guard: None,
            host_fns: HashMap::new(),
            aborted: Arc::new(AtomicBool::new(false)),
            probe: self.probe.clone(),
        }))
    }
}

struct StubAbort {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle for StubAbort {
    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

/// In-process fake of an isolated script context.
pub struct StubRuntime {
    guard: Option<TerminationCheck>,
    host_fns: HashMap<String, HostFn>,
    aborted: Arc<AtomicBool>,
    probe: RuntimeProbe,
}

impl StubRuntime {
    /// Checkpoint: the abort signal and the installed guard both unwind
    /// execution, the way a real engine's terminate call would.
    fn checkpoint(&self) -> Result<(), TerminationReason> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(TerminationReason::Terminated);
        }
        if let Some(guard) = &self.guard {
            guard()?;
        }
        Ok(())
    }

    fn run_directive(&mut self, line: &str) -> Result<Option<JsonValue>, TerminationReason> {
        if let Some(rest) = line.strip_prefix("value:") {
            let value = serde_json::from_str(rest)
                .map_err(|e| TerminationReason::Exception(e.to_string()))?;
            Ok(Some(value))
        } else if let Some(rest) = line.strip_prefix("fail:") {
            Err(TerminationReason::Exception(rest.to_string()))
        } else if let Some(rest) = line.strip_prefix("print:") {
            let args = [rest.to_string()];
            if let Some(f) = self.host_fns.get_mut("print") {
                f(&args);
            }
            Ok(None)
        } else if line == "spin" {
            loop {
                self.checkpoint()?;
                std::thread::yield_now();
            }
        } else {
            Ok(Some(JsonValue::String(line.to_string())))
        }
    }
}

impl ScriptRuntime for StubRuntime {
    fn register_guard(
        &mut self,
        _name: &str,
        check: TerminationCheck,
    ) -> Result<(), TerminationReason> {
        self.guard = Some(check);
        Ok(())
    }

    fn register_host_fn(&mut self, name: &str, f: HostFn) -> Result<(), TerminationReason> {
        self.host_fns.insert(name.to_string(), f);
        Ok(())
    }

    fn execute(&mut self, source: &str) -> Result<Option<JsonValue>, TerminationReason> {
        let mut last = None;
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            // The worker prepends an invocation of the guard function;
            // any bare `<name>();` line is treated as that checkpoint.
            if line.ends_with("();") {
                self.checkpoint()?;
                continue;
            }
            last = self.run_directive(line)?;
        }
        Ok(last)
    }

    fn call_function(&mut self, name: &str, args: &[String]) -> Result<(), TerminationReason> {
        self.checkpoint()?;
        self.probe
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), args.to_vec()));
        if args.first().is_some_and(|a| a == "boom") {
            return Err(TerminationReason::Exception("boom".into()));
        }
        Ok(())
    }

    fn abort_handle(&self) -> Arc<dyn AbortHandle> {
        Arc::new(StubAbort {
            aborted: Arc::clone(&self.aborted),
        })
    }
}

impl Drop for StubRuntime {
    fn drop(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

use crate::mailbox::{Mailbox, Message};
use crate::runtime::{
    AbortHandle, HostFn, RuntimeFactory, ScriptRuntime, TERMINATION_GUARD_FN, TerminationCheck,
};
use crate::{LogEvent, LogLevel, LogSender, Payload, StartError, TerminationReason};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lifecycle state of a worker.
///
/// `Created → Running → {AwaitingMessage ⇄ Draining} → Terminated`.
/// `Terminated` is terminal: the runtime has been released and only
/// read-only status queries remain meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Constructed, not yet started.
    Created,
    /// Executing payload scripts.
    Running,
    /// Long-running worker blocked on an empty mailbox.
    AwaitingMessage,
    /// Dispatching a queued message to the script handler.
    Draining,
    /// Done. Runtime released, no further message delivery.
    Terminated,
}

/// State shared between the worker thread and every caller thread.
/// All of it lives under one mutex; every mutation and every
/// wait/notify happens while holding that lock.
struct Shared {
    state: WorkerState,
    started: bool,
    shutting_down: bool,
    force_terminating: bool,
    mailbox: Mailbox,
    /// Present only while a runtime is attached.
    abort: Option<Arc<dyn AbortHandle>>,
    result: Option<String>,
    results: Vec<JsonValue>,
    last_error: Option<TerminationReason>,
}

struct Inner {
    shared: Mutex<Shared>,
    wakeup: Condvar,
}

impl Inner {
    /// A worker thread that panicked mid-script must not poison status
    /// queries, so poisoned locks are recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs one script payload on a dedicated thread, bound to an isolated
/// script runtime.
///
/// A `Worker` is a clonable handle: the supervisor and any number of
/// caller threads may post messages, request shutdown, force
/// termination, or query status concurrently with the worker's own
/// thread. The worker itself is single-use - it runs its state machine
/// to [`WorkerState::Terminated`] exactly once and cannot be restarted.
///
/// Two tiers of cancellation:
/// - [`request_shutdown`](Worker::request_shutdown) lets in-flight and
///   already-queued work finish, then stops;
/// - [`force_terminate`](Worker::force_terminate) additionally aborts
///   an in-flight script through the runtime's abort handle and the
///   termination guard, and discards queued messages.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
    payload: Payload,
    log_tx: Option<LogSender>,
}

impl Worker {
    /// Create a worker with the given payload and optional log sink.
    pub fn new(payload: impl Into<Payload>, log_tx: Option<LogSender>) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: WorkerState::Created,
                    started: false,
                    shutting_down: false,
                    force_terminating: false,
                    mailbox: Mailbox::new(),
                    abort: None,
                    result: None,
                    results: Vec::new(),
                    last_error: None,
                }),
                wakeup: Condvar::new(),
            }),
            payload: payload.into(),
            log_tx,
        }
    }

    /// Create a worker that executes one script and terminates.
    pub fn single(script: impl Into<String>) -> Self {
        Self::new(Payload::single(script), None)
    }

    /// Create a worker that executes an ordered sequence of scripts.
    pub fn sequence<I, S>(scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Payload::sequence(scripts), None)
    }

    /// Create a long-running worker: `script` bootstraps the context,
    /// then the worker dispatches mailbox messages to the script-defined
    /// function named `message_handler` until shut down.
    pub fn long_running(script: impl Into<String>, message_handler: impl Into<String>) -> Self {
        Self::new(Payload::long_running(script, message_handler), None)
    }

    /// Begin execution on a new dedicated thread.
    ///
    /// The factory runs on that thread to produce the runtime, so the
    /// runtime itself does not have to be `Send`. Fails if the worker
    /// was already started.
    pub fn start<F>(&self, factory: F) -> Result<(), StartError>
    where
        F: RuntimeFactory + 'static,
    {
        {
            let mut shared = self.inner.lock();
            if shared.started {
                return Err(StartError::AlreadyStarted);
            }
            shared.started = true;
        }

        let inner = Arc::clone(&self.inner);
        let payload = self.payload.clone();
        let log_tx = self.log_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("script-worker".into())
            .spawn(move || run(&inner, &payload, log_tx, factory));

        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                self.inner.lock().started = false;
                Err(StartError::Spawn(e))
            }
        }
    }

    /// Request graceful shutdown: queued messages are still drained, an
    /// in-flight script is not aborted. Idempotent; a no-op after
    /// termination.
    pub fn request_shutdown(&self) {
        let mut shared = self.inner.lock();
        shared.shutting_down = true;
        self.inner.wakeup.notify_all();
        drop(shared);
    }

    /// Force termination: aborts any in-flight script via the runtime's
    /// abort handle, and the mailbox loop exits without draining.
    /// Idempotent, safe from any thread, including concurrently with
    /// `start()` or the worker's own thread.
    pub fn force_terminate(&self) {
        let mut shared = self.inner.lock();
        shared.force_terminating = true;
        shared.shutting_down = true;
        if let Some(abort) = &shared.abort {
            abort.abort();
        }
        self.inner.wakeup.notify_all();
        drop(shared);
    }

    /// Append a message to the mailbox and wake the worker if it is
    /// waiting. Never fails: messages posted after termination are
    /// accepted into the queue but never delivered, so callers that
    /// care should check [`has_terminated`](Worker::has_terminated)
    /// first.
    pub fn post_message(&self, message: impl Into<Message>) {
        let mut shared = self.inner.lock();
        shared.mailbox.push(message.into());
        self.inner.wakeup.notify_all();
        drop(shared);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    /// Whether shutdown (graceful or forced) has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Whether forced termination has been requested.
    pub fn is_terminating(&self) -> bool {
        self.inner.lock().force_terminating
    }

    /// Whether the worker has reached its terminal state.
    pub fn has_terminated(&self) -> bool {
        self.inner.lock().state == WorkerState::Terminated
    }

    /// Whether a genuine failure was captured. False after an
    /// intentional forced stop: the termination unwind is expected
    /// control flow, not an exception.
    pub fn has_exception(&self) -> bool {
        self.inner.lock().last_error.is_some()
    }

    /// The captured failure, if any.
    pub fn exception(&self) -> Option<TerminationReason> {
        self.inner.lock().last_error.clone()
    }

    /// Textual form of the last produced value. Absent until a script
    /// has completed successfully.
    pub fn result(&self) -> Option<String> {
        self.inner.lock().result.clone()
    }

    /// Values produced by a sequence payload, one per completed script.
    /// Empty for the other payload variants.
    pub fn results(&self) -> Vec<JsonValue> {
        self.inner.lock().results.clone()
    }

    /// Block until the worker terminates or the timeout elapses.
    /// Returns true if the worker is terminated.
    pub fn wait_terminated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut shared = self.inner.lock();
        while shared.state != WorkerState::Terminated {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .wakeup
                .wait_timeout(shared, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            shared = guard;
        }
        true
    }
}

/// Body of the dedicated worker thread.
fn run<F>(inner: &Arc<Inner>, payload: &Payload, log_tx: Option<LogSender>, mut factory: F)
where
    F: RuntimeFactory,
{
    let mut runtime = match setup(inner, log_tx, &mut factory) {
        Ok(runtime) => runtime,
        Err(reason) => {
            finish(inner, None, Some(reason));
            return;
        }
    };

    let outcome = execute(inner, payload, runtime.as_mut());

    // The unwind raised by the termination guard signals a successful
    // forced stop; only genuine failures are surfaced as the exception.
    let error = outcome.err().filter(|reason| !reason.is_termination());
    finish(inner, Some(runtime), error);
}

/// Acquire and configure a fresh runtime.
///
/// Runs under the worker's lock so a `force_terminate` arriving from
/// another thread cannot race the creation of the abort handle: either
/// it sees no handle yet (and the payload check below skips execution),
/// or it sees the stored handle and aborts through it.
fn setup<F>(
    inner: &Arc<Inner>,
    log_tx: Option<LogSender>,
    factory: &mut F,
) -> Result<Box<dyn ScriptRuntime>, TerminationReason>
where
    F: RuntimeFactory,
{
    let mut shared = inner.lock();
    let mut runtime = factory.create()?;

    let check_inner = Arc::clone(inner);
    let check: TerminationCheck = Arc::new(move || {
        if check_inner.lock().force_terminating {
            Err(TerminationReason::Terminated)
        } else {
            Ok(())
        }
    });
    runtime.register_guard(TERMINATION_GUARD_FN, check)?;
    runtime.register_host_fn("print", print_sink(log_tx))?;

    shared.abort = Some(runtime.abort_handle());
    if shared.force_terminating {
        // Termination was requested before the handle existed; send the
        // abort now so the invariant holds for any script that might
        // still be reached.
        if let Some(abort) = &shared.abort {
            abort.abort();
        }
    }
    shared.state = WorkerState::Running;
    Ok(runtime)
}

/// Execute the payload, then the mailbox loop for long-running workers.
fn execute(
    inner: &Arc<Inner>,
    payload: &Payload,
    runtime: &mut dyn ScriptRuntime,
) -> Result<(), TerminationReason> {
    if inner.lock().force_terminating {
        return Ok(());
    }

    match payload {
        Payload::Single(script) => {
            let value = run_script(runtime, script)?;
            record_result(inner, value);
        }
        Payload::Sequence(scripts) => {
            let mut last = None;
            for script in scripts {
                let value = run_script(runtime, script)?;
                inner
                    .lock()
                    .results
                    .push(value.clone().unwrap_or(JsonValue::Null));
                last = value;
            }
            record_result(inner, last);
        }
        Payload::LongRunning {
            script,
            message_handler,
        } => {
            let value = run_script(runtime, script)?;
            record_result(inner, value);
            message_loop(inner, runtime, message_handler)?;
        }
    }
    Ok(())
}

/// Execute one script text, preceded by the implicit guard call so a
/// script that never yields still observes forced termination at its
/// next statement boundary.
fn run_script(
    runtime: &mut dyn ScriptRuntime,
    script: &str,
) -> Result<Option<JsonValue>, TerminationReason> {
    let source = format!("{TERMINATION_GUARD_FN}();\n{script}");
    runtime.execute(&source)
}

fn record_result(inner: &Inner, value: Option<JsonValue>) {
    if let Some(value) = value {
        let text = match value {
            JsonValue::String(s) => s,
            other => other.to_string(),
        };
        inner.lock().result = Some(text);
    }
}

/// Dequeue and dispatch messages until shutdown drains the mailbox or
/// forced termination discards it.
///
/// The emptiness check and the wait happen under one held lock, and
/// every producer signals under that same lock, so a message or
/// shutdown arriving between the check and the wait cannot be lost.
fn message_loop(
    inner: &Arc<Inner>,
    runtime: &mut dyn ScriptRuntime,
    handler: &str,
) -> Result<(), TerminationReason> {
    loop {
        let message = {
            let mut shared = inner.lock();
            while shared.mailbox.is_empty() && !shared.shutting_down {
                shared.state = WorkerState::AwaitingMessage;
                shared = inner
                    .wakeup
                    .wait(shared)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if shared.force_terminating || (shared.mailbox.is_empty() && shared.shutting_down) {
                return Ok(());
            }
            shared.state = WorkerState::Draining;
            shared.mailbox.pop()
        };

        if let Some(message) = message {
            // A handler failure propagates and ends the loop; remaining
            // queued messages are left undelivered.
            runtime.call_function(handler, message.parts())?;
        }
    }
}

/// Unconditional final step: release the runtime (exactly once), detach
/// the abort handle, record any failure, and flip to `Terminated`.
/// Runs on every exit path, including forced termination and setup
/// failure.
fn finish(inner: &Inner, runtime: Option<Box<dyn ScriptRuntime>>, error: Option<TerminationReason>) {
    let mut shared = inner.lock();
    shared.abort = None;
    // Dropped under the lock: a concurrent force_terminate either ran
    // before this critical section and aborted through the handle, or
    // runs after it and finds no handle to signal.
    drop(runtime);
    if let Some(error) = error {
        shared.last_error = Some(error);
    }
    shared.state = WorkerState::Terminated;
    inner.wakeup.notify_all();
}

/// Host `print` function installed into every runtime: routes script
/// output to the log channel, or stderr when none was provided.
fn print_sink(log_tx: Option<LogSender>) -> HostFn {
    Box::new(move |args: &[String]| {
        let message = args.join(" ");
        match &log_tx {
            Some(tx) => {
                let _ = tx.send(LogEvent {
                    level: LogLevel::Log,
                    message,
                });
            }
            None => eprintln!("[{}] {}", LogLevel::Log, message),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubRuntimeFactory;
    use serde_json::json;
    use std::sync::mpsc;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn single_script_produces_result() {
        let worker = Worker::single("value:42");
        worker.start(StubRuntimeFactory::new()).unwrap();

        assert!(worker.wait_terminated(WAIT));
        assert_eq!(worker.result(), Some("42".to_string()));
        assert!(worker.results().is_empty());
        assert!(!worker.has_exception());
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[test]
    fn string_result_is_unquoted() {
        let worker = Worker::single(r#"value:"hello""#);
        worker.start(StubRuntimeFactory::new()).unwrap();

        assert!(worker.wait_terminated(WAIT));
        assert_eq!(worker.result(), Some("hello".to_string()));
    }

    #[test]
    fn sequence_collects_results_in_order() {
        let worker = Worker::sequence(["value:1", "value:2", "value:3"]);
        worker.start(StubRuntimeFactory::new()).unwrap();

        assert!(worker.wait_terminated(WAIT));
        assert_eq!(worker.results(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(worker.result(), Some("3".to_string()));
        assert!(!worker.has_exception());
    }

    #[test]
    fn sequence_fails_fast() {
        let worker = Worker::sequence(["value:1", "fail:bad script", "value:3"]);
        worker.start(StubRuntimeFactory::new()).unwrap();

        assert!(worker.wait_terminated(WAIT));
        // Only the first script completed; the third never ran.
        assert_eq!(worker.results(), vec![json!(1)]);
        assert!(worker.has_exception());
        assert_eq!(
            worker.exception(),
            Some(TerminationReason::Exception("bad script".into()))
        );
        assert_eq!(worker.result(), None);
    }

    #[test]
    fn graceful_shutdown_terminates_without_force() {
        let worker = Worker::long_running("boot", "onMessage");
        worker.start(StubRuntimeFactory::new()).unwrap();

        worker.request_shutdown();
        assert!(worker.wait_terminated(WAIT));
        assert!(worker.is_shutting_down());
        assert!(!worker.is_terminating());
        assert!(!worker.has_exception());
    }

    #[test]
    fn force_terminate_stops_infinite_loop() {
        let factory = StubRuntimeFactory::new();
        let worker = Worker::single("spin");
        worker.start(factory).unwrap();

        // Give the script time to enter its loop.
        thread::sleep(Duration::from_millis(50));
        worker.force_terminate();

        assert!(worker.wait_terminated(WAIT));
        // The forced-stop unwind is not reported as an exception.
        assert!(!worker.has_exception());
        assert!(worker.is_terminating());
    }

    #[test]
    fn messages_drained_fifo_before_shutdown() {
        let factory = StubRuntimeFactory::new();
        let probe = factory.probe();
        let worker = Worker::long_running("boot", "onMessage");

        worker.post_message(vec!["m1".to_string()]);
        worker.post_message(vec!["m2".to_string(), "extra".to_string()]);
        worker.post_message(vec!["m3".to_string()]);
        worker.request_shutdown();
        worker.start(factory).unwrap();

        assert!(worker.wait_terminated(WAIT));
        assert_eq!(
            probe.handler_calls(),
            vec![
                ("onMessage".to_string(), vec!["m1".to_string()]),
                (
                    "onMessage".to_string(),
                    vec!["m2".to_string(), "extra".to_string()]
                ),
                ("onMessage".to_string(), vec!["m3".to_string()]),
            ]
        );
    }

    #[test]
    fn messages_after_force_are_never_dispatched() {
        let factory = StubRuntimeFactory::new();
        let probe = factory.probe();
        let worker = Worker::long_running("boot", "onMessage");

        worker.force_terminate();
        worker.post_message(vec!["never".to_string()]);
        worker.start(factory).unwrap();

        assert!(worker.wait_terminated(WAIT));
        assert!(probe.handler_calls().is_empty());
        // The bootstrap script never ran either.
        assert_eq!(worker.result(), None);
    }

    #[test]
    fn post_message_after_termination_is_accepted() {
        let worker = Worker::single("value:1");
        worker.start(StubRuntimeFactory::new()).unwrap();
        assert!(worker.wait_terminated(WAIT));

        // Accepted into the queue, never delivered, never fails.
        worker.post_message(vec!["late".to_string()]);
        assert!(worker.has_terminated());
    }

    #[test]
    fn shutdown_and_force_are_idempotent() {
        let worker = Worker::long_running("boot", "onMessage");
        worker.start(StubRuntimeFactory::new()).unwrap();

        worker.request_shutdown();
        worker.request_shutdown();
        worker.force_terminate();
        worker.force_terminate();

        assert!(worker.wait_terminated(WAIT));
        assert!(worker.is_shutting_down());
        assert!(worker.is_terminating());
    }

    #[test]
    fn concurrent_force_terminate_releases_once() {
        let factory = StubRuntimeFactory::new();
        let probe = factory.probe();
        let worker = Worker::single("spin");
        worker.start(factory).unwrap();
        thread::sleep(Duration::from_millis(50));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let w = worker.clone();
                thread::spawn(move || w.force_terminate())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(worker.wait_terminated(WAIT));
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn setup_failure_terminates_with_error() {
        let worker = Worker::single("value:1");
        worker.start(StubRuntimeFactory::failing()).unwrap();

        assert!(worker.wait_terminated(WAIT));
        assert!(worker.has_exception());
        let reason = worker.exception().unwrap();
        assert!(reason.is_setup_error());
        assert_eq!(worker.result(), None);
    }

    #[test]
    fn starting_twice_is_rejected() {
        let worker = Worker::long_running("boot", "onMessage");
        worker.start(StubRuntimeFactory::new()).unwrap();

        let err = worker.start(StubRuntimeFactory::new());
        assert!(matches!(err, Err(StartError::AlreadyStarted)));

        worker.request_shutdown();
        assert!(worker.wait_terminated(WAIT));
    }

    #[test]
    fn handler_failure_ends_the_loop() {
        let factory = StubRuntimeFactory::new();
        let probe = factory.probe();
        let worker = Worker::long_running("boot", "onMessage");

        worker.post_message(vec!["boom".to_string()]);
        worker.post_message(vec!["after".to_string()]);
        worker.start(factory).unwrap();

        assert!(worker.wait_terminated(WAIT));
        // The failing dispatch was attempted; the one behind it never was.
        assert_eq!(
            probe.handler_calls(),
            vec![("onMessage".to_string(), vec!["boom".to_string()])]
        );
        assert!(worker.has_exception());
        assert!(worker.exception().unwrap().is_exception());
    }

    #[test]
    fn print_routes_to_log_sender() {
        let (tx, rx) = mpsc::channel();
        let worker = Worker::new(Payload::single("print:hello"), Some(tx));
        worker.start(StubRuntimeFactory::new()).unwrap();

        assert!(worker.wait_terminated(WAIT));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.level, LogLevel::Log);
        assert_eq!(event.message, "hello");
    }

    #[test]
    fn state_starts_created_and_ends_terminated() {
        let worker = Worker::single("value:1");
        assert_eq!(worker.state(), WorkerState::Created);
        assert!(!worker.has_terminated());

        worker.start(StubRuntimeFactory::new()).unwrap();
        assert!(worker.wait_terminated(WAIT));
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[test]
    fn long_running_worker_awaits_messages() {
        let worker = Worker::long_running("boot", "onMessage");
        worker.start(StubRuntimeFactory::new()).unwrap();

        // Poll until the worker parks on its empty mailbox.
        let deadline = Instant::now() + WAIT;
        while worker.state() != WorkerState::AwaitingMessage {
            assert!(Instant::now() < deadline, "worker never started waiting");
            thread::sleep(Duration::from_millis(5));
        }

        worker.request_shutdown();
        assert!(worker.wait_terminated(WAIT));
    }
}

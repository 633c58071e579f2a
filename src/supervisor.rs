use crate::Worker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Opaque key identifying a worker registered with a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerKey(u64);

/// Owns a set of workers and broadcasts lifecycle signals to them.
///
/// The supervisor does not retry failed workers; a worker's failure is
/// local to that worker, observable through its status queries.
#[derive(Default)]
pub struct Supervisor {
    next_key: AtomicU64,
    workers: Mutex<HashMap<WorkerKey, Worker>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, HashMap<WorkerKey, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a worker, returning the key it is known by.
    pub fn register(&self, worker: Worker) -> WorkerKey {
        let key = WorkerKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        self.workers().insert(key, worker);
        key
    }

    /// Remove a worker. The worker keeps running; this only drops the
    /// supervisor's handle to it.
    pub fn unregister(&self, key: WorkerKey) -> Option<Worker> {
        self.workers().remove(&key)
    }

    /// Clone of the handle for a registered worker, for status queries
    /// or direct control.
    pub fn get(&self, key: WorkerKey) -> Option<Worker> {
        self.workers().get(&key).cloned()
    }

    /// Broadcast graceful shutdown to every registered worker.
    pub fn shutdown_all(&self) {
        for worker in self.workers().values() {
            worker.request_shutdown();
        }
    }

    /// Broadcast forced termination to every registered worker.
    pub fn force_terminate_all(&self) {
        for worker in self.workers().values() {
            worker.force_terminate();
        }
    }

    pub fn len(&self) -> usize {
        self.workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers().is_empty()
    }
}

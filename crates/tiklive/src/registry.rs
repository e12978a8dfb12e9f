//! In-flight recordings for fan-out mode, keyed by handle.
//!
//! At most one running recording per handle. An entry only goes away once its
//! task has finished, so a handle becomes eligible again on the scan after its
//! recording ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Entries {
    running: HashMap<String, JoinHandle<()>>,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct WatchRegistry {
    inner: Arc<Mutex<Entries>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a recording for `handle` is still running.
    pub fn is_recording(&self, handle: &str) -> bool {
        let entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .running
            .get(handle)
            .is_some_and(|task| !task.is_finished())
    }

    /// Start a recording for `handle` unless one is already running.
    ///
    /// The check and the insert happen under one lock, so two scans can never
    /// both start the same handle. Returns false when nothing was spawned.
    pub fn register<F>(&self, handle: &str, spawn: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.closed {
            return false;
        }
        if entries
            .running
            .get(handle)
            .is_some_and(|task| !task.is_finished())
        {
            return false;
        }
        entries.running.insert(handle.to_string(), spawn());
        true
    }

    /// Drop entries whose task has finished. Returns the evicted handles.
    pub fn evict_finished(&self) -> Vec<String> {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let finished: Vec<String> = entries
            .running
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in &finished {
            entries.running.remove(handle);
        }
        finished
    }

    pub fn len(&self) -> usize {
        let entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entries.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further registrations.
    pub fn close(&self) {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entries.closed = true;
    }

    /// Wait for every registered recording to finish and clear the registry.
    pub async fn wait_all(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> = {
            let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            entries.running.drain().collect()
        };

        for (handle, task) in tasks {
            if let Err(e) = task.await {
                tracing::error!(handle = %handle, error = %e, "Recording task failed");
            }
        }
    }
}

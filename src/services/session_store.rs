//! In-memory tracking of in-progress uploads.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio::sync::Mutex as AsyncMutex;

struct SessionEntry {
    last_activity: Instant,
    /// Serializes chunk writes with each other and with deletion, so a
    /// janitor sweep never observes a half-written append.
    writer: Arc<AsyncMutex<()>>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            last_activity: Instant::now(),
            writer: Arc::new(AsyncMutex::new(())),
        }
    }
}

/// Map from upload id to last-activity timestamp.
///
/// An entry is present exactly while the upload is in progress: `open`
/// inserts it at session creation, and both finalize and delete remove it.
/// Absence means the session was finalized, deleted, or never existed.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created session with `last_activity = now`.
    pub fn open(&self, id: &str) {
        self.lock().insert(id.to_string(), SessionEntry::new());
    }

    /// Refresh `last_activity`. Returns false when the session is not open;
    /// a closed session is never re-opened by activity.
    pub fn touch(&self, id: &str) -> bool {
        match self.lock().get_mut(id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove the entry. Idempotent: returns false when already gone.
    pub fn close(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Hand out the per-session write lock, if the session is open.
    pub fn writer(&self, id: &str) -> Option<Arc<AsyncMutex<()>>> {
        self.lock().get(id).map(|entry| entry.writer.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot the ids idle for longer than `threshold`.
    ///
    /// Callers delete the returned sessions after the lock is released, so
    /// the map is never mutated while being iterated.
    pub fn stale(&self, threshold: Duration) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, entry)| entry.last_activity.elapsed() > threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.inner.lock().expect("session store lock poisoned")
    }
}

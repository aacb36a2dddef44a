//! Debounced persistence of field text.
//!
//! ```text
//! schedule(k, "a") ─┐
//! schedule(k, "ab") ┼─ restart ─┐
//! schedule(k, "abc")┘           └─ quiet window ─► persist_field(k, "abc")
//! ```
//!
//! One timer per field-instance; each schedule aborts and restarts that
//! field's timer. The text written is whatever the field held when the timer
//! fired: remote merges inside the window update it through [`refresh`].
//! No ordering across fields, last write wins per field.
//!
//! [`refresh`]: DebouncedPersister::refresh

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::operation::FieldKey;
use crate::store::FieldStore;

/// Default quiet window before a write fires.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Persist counters, updated from detached timer tasks.
#[derive(Debug, Default)]
struct AtomicPersistStats {
    writes: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of persister activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub scheduled: u64,
    pub writes: u64,
    pub failures: u64,
}

struct PendingWrite {
    generation: u64,
    text: String,
    handle: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<FieldKey, PendingWrite>>>;

/// Coalesces rapid edits per field into one delayed write.
pub struct DebouncedPersister {
    presentation_id: Uuid,
    window: Duration,
    store: Arc<dyn FieldStore>,
    pending: PendingMap,
    generation: u64,
    scheduled: u64,
    stats: Arc<AtomicPersistStats>,
}

impl DebouncedPersister {
    pub fn new(presentation_id: Uuid, window: Duration, store: Arc<dyn FieldStore>) -> Self {
        Self {
            presentation_id,
            window,
            store,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: 0,
            scheduled: 0,
            stats: Arc::new(AtomicPersistStats::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// (Re)start the timer for `key` with `text` as the field's latest text.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, key: FieldKey, text: String) {
        self.generation += 1;
        self.scheduled += 1;
        let generation = self.generation;

        let pending = self.pending.clone();
        let store = self.store.clone();
        let stats = self.stats.clone();
        let presentation_id = self.presentation_id;
        let window = self.window;
        let timer_key = key.clone();

        // Hold the map while spawning so the entry exists before the timer
        // can look for it, even with a zero window.
        let mut map = lock(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;

            // Take the entry first; a schedule racing this write starts a
            // fresh timer with newer text.
            let text = {
                let mut map = lock(&pending);
                match map.get(&timer_key) {
                    Some(entry) if entry.generation == generation => {
                        map.remove(&timer_key).map(|entry| entry.text)
                    }
                    _ => None,
                }
            };
            let Some(text) = text else {
                return;
            };

            write_field(&*store, &stats, presentation_id, timer_key, text).await;
        });

        if let Some(previous) = map.insert(key, PendingWrite { generation, text, handle }) {
            previous.handle.abort();
        }
    }

    /// Swap in newer text for a field whose timer is still running, so a
    /// remote merge inside the window is part of the write. Fields without a
    /// running timer are left alone.
    pub fn refresh(&self, key: &FieldKey, text: &str) -> bool {
        match lock(&self.pending).get_mut(key) {
            Some(entry) => {
                if entry.text != text {
                    entry.text = text.to_string();
                    log::trace!("Pending write for {key} refreshed");
                }
                true
            }
            None => false,
        }
    }

    /// Write every pending text now, cancelling the timers.
    pub async fn flush(&mut self) -> usize {
        let drained: Vec<(FieldKey, PendingWrite)> = lock(&self.pending).drain().collect();
        let count = drained.len();

        for (key, entry) in drained {
            entry.handle.abort();
            write_field(&*self.store, &self.stats, self.presentation_id, key, entry.text).await;
        }

        if count > 0 {
            log::info!("Flushed {count} pending field writes");
        }
        count
    }

    /// Fields with a timer still running.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_pending(&self, key: &FieldKey) -> bool {
        lock(&self.pending).contains_key(key)
    }

    pub fn stats(&self) -> PersistStats {
        PersistStats {
            scheduled: self.scheduled,
            writes: self.stats.writes.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DebouncedPersister {
    fn drop(&mut self) {
        for (_, entry) in lock(&self.pending).drain() {
            entry.handle.abort();
        }
    }
}

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<FieldKey, PendingWrite>> {
    // A panicking timer task cannot leave the map half-updated.
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn write_field(
    store: &dyn FieldStore,
    stats: &AtomicPersistStats,
    presentation_id: Uuid,
    key: FieldKey,
    text: String,
) {
    let label = key.to_string();
    let FieldKey {
        slide_id,
        field,
        content_index,
    } = key;

    match store
        .persist_field(presentation_id, slide_id, field, content_index, text)
        .await
    {
        Ok(()) => {
            stats.writes.fetch_add(1, Ordering::Relaxed);
            log::debug!("Persisted field {label}");
        }
        Err(e) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            log::error!("Failed to persist field {label}: {e}");
        }
    }
}

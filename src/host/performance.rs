//! Resource-timing observation.
//!
//! Observers register for entry types and receive entries in batches. Entries
//! describe requests that already happened; an observer never learns about
//! requests made before it registered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Performance entry type.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Resource,
    Navigation,
    Mark,
    Measure,
}

/// One timeline entry. For resource entries `name` is the request URL.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub start_time: f64,
    pub duration: f64,
}

impl PerformanceEntry {
    /// A resource entry for `url`.
    #[must_use]
    pub fn resource(url: impl Into<String>, start_time: f64, duration: f64) -> Self {
        Self {
            name: url.into(),
            entry_type: EntryType::Resource,
            start_time,
            duration,
        }
    }
}

/// Unique identifier for a timeline observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(Uuid);

impl ObserverId {
    /// Create a new random observer id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer callback, invoked once per delivered batch.
pub type ObserverCallback = Arc<dyn Fn(&[PerformanceEntry]) + Send + Sync>;

/// Performance observation API.
pub trait PerformanceTimeline: Send + Sync {
    /// Register `callback` for batches containing `entry_types`.
    fn observe(&self, entry_types: &[EntryType], callback: ObserverCallback) -> ObserverId;

    /// Stop delivering to an observer. Unknown ids are ignored.
    fn disconnect(&self, id: ObserverId);
}

struct Observer {
    entry_types: Vec<EntryType>,
    callback: ObserverCallback,
}

/// Buffered timeline: `record` appends, `flush` delivers the buffer as one
/// batch to every interested observer.
#[derive(Default)]
pub struct ResourceTimeline {
    observers: Mutex<HashMap<ObserverId, Observer>>,
    buffer: Mutex<Vec<PerformanceEntry>>,
}

impl ResourceTimeline {
    /// Empty timeline with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an entry for the next delivery.
    pub fn record(&self, entry: PerformanceEntry) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver buffered entries. Returns the number of entries flushed.
    pub fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        if batch.is_empty() {
            return 0;
        }

        // Snapshot observers so callbacks may register/disconnect freely.
        let targets: Vec<(Vec<EntryType>, ObserverCallback)> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|o| (o.entry_types.clone(), Arc::clone(&o.callback)))
            .collect();

        for (types, callback) in targets {
            let entries: Vec<PerformanceEntry> = batch
                .iter()
                .filter(|e| types.contains(&e.entry_type))
                .cloned()
                .collect();
            if !entries.is_empty() {
                callback(&entries);
            }
        }

        batch.len()
    }
}

impl PerformanceTimeline for ResourceTimeline {
    fn observe(&self, entry_types: &[EntryType], callback: ObserverCallback) -> ObserverId {
        let id = ObserverId::new();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Observer {
                    entry_types: entry_types.to_vec(),
                    callback,
                },
            );
        id
    }

    fn disconnect(&self, id: ObserverId) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

impl std::fmt::Debug for ResourceTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTimeline")
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(batches: &Arc<AtomicUsize>, entries: &Arc<AtomicUsize>) -> ObserverCallback {
        let batches = Arc::clone(batches);
        let entries = Arc::clone(entries);
        Arc::new(move |batch: &[PerformanceEntry]| {
            batches.fetch_add(1, Ordering::SeqCst);
            entries.fetch_add(batch.len(), Ordering::SeqCst);
        })
    }

    #[test]
    fn flush_delivers_one_batch_per_observer() {
        let timeline = ResourceTimeline::new();
        let batches = Arc::new(AtomicUsize::new(0));
        let entries = Arc::new(AtomicUsize::new(0));
        timeline.observe(&[EntryType::Resource], counting(&batches, &entries));

        timeline.record(PerformanceEntry::resource("/cart/add.js", 1.0, 5.0));
        timeline.record(PerformanceEntry::resource("/cart/change.js", 2.0, 5.0));
        assert_eq!(timeline.flush(), 2);

        assert_eq!(batches.load(Ordering::SeqCst), 1);
        assert_eq!(entries.load(Ordering::SeqCst), 2);
        assert_eq!(timeline.flush(), 0);
    }

    #[test]
    fn observers_only_see_requested_types() {
        let timeline = ResourceTimeline::new();
        let batches = Arc::new(AtomicUsize::new(0));
        let entries = Arc::new(AtomicUsize::new(0));
        timeline.observe(&[EntryType::Resource], counting(&batches, &entries));

        timeline.record(PerformanceEntry {
            name: "first-paint".to_string(),
            entry_type: EntryType::Mark,
            start_time: 0.0,
            duration: 0.0,
        });
        timeline.flush();
        assert_eq!(batches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disconnected_observer_receives_nothing() {
        let timeline = ResourceTimeline::new();
        let batches = Arc::new(AtomicUsize::new(0));
        let entries = Arc::new(AtomicUsize::new(0));
        let id = timeline.observe(&[EntryType::Resource], counting(&batches, &entries));
        timeline.disconnect(id);
        assert_eq!(timeline.observer_count(), 0);

        timeline.record(PerformanceEntry::resource("/cart/add.js", 1.0, 5.0));
        timeline.flush();
        assert_eq!(batches.load(Ordering::SeqCst), 0);
    }
}

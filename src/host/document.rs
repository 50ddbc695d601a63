//! Page event target.
//!
//! Named custom events are delivered to callback listeners and to channel
//! subscriptions. Delivery never blocks the dispatcher: a subscriber whose
//! buffer is full misses the event and the drop is counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MonitorResult;

use super::stream::EventStream;

/// Unique identifier for a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a callback listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Create a new random listener id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A named event with a JSON detail payload.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    pub event_id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub detail: serde_json::Value,
    pub bubbles: bool,
}

impl CustomEvent {
    /// A non-bubbling event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            detail,
            bubbles: false,
        }
    }

    /// A bubbling event.
    #[must_use]
    pub fn bubbling(event_type: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            bubbles: true,
            ..Self::new(event_type, detail)
        }
    }

    /// Deserialize the detail payload.
    pub fn detail_as<T: DeserializeOwned>(&self) -> MonitorResult<T> {
        Ok(serde_json::from_value(self.detail.clone())?)
    }
}

/// Callback listener.
pub type EventListener = Arc<dyn Fn(&CustomEvent) + Send + Sync>;

struct StreamEntry {
    event_type: String,
    tx: Sender<CustomEvent>,
}

struct ListenerEntry {
    event_type: String,
    listener: EventListener,
}

#[derive(Default)]
struct Listeners {
    streams: HashMap<SubscriptionId, StreamEntry>,
    callbacks: HashMap<ListenerId, ListenerEntry>,
}

/// The document every page event is dispatched on.
pub struct Document {
    listeners: Mutex<Listeners>,
    stream_capacity: usize,
    dropped_events: AtomicU64,
}

impl Document {
    /// Per-subscription buffer capacity used by `new`.
    pub const DEFAULT_STREAM_CAPACITY: usize = 1024;

    /// Document with default subscription buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stream_capacity(Self::DEFAULT_STREAM_CAPACITY)
    }

    /// Document with a custom per-subscription buffer capacity.
    #[must_use]
    pub fn with_stream_capacity(capacity: usize) -> Self {
        Self {
            listeners: Mutex::new(Listeners::default()),
            stream_capacity: capacity.max(1),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Register a callback listener for `event_type`.
    pub fn add_event_listener(&self, event_type: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId::new();
        self.lock().callbacks.insert(
            id,
            ListenerEntry {
                event_type: event_type.to_string(),
                listener,
            },
        );
        id
    }

    /// Remove a callback listener. Returns false if it was not registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.lock().callbacks.remove(&id).is_some()
    }

    /// Subscribe to `event_type` through a buffered stream.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, event_type: &str) -> EventStream {
        let id = SubscriptionId::new();
        let (tx, rx) = bounded::<CustomEvent>(self.stream_capacity);
        self.lock().streams.insert(
            id,
            StreamEntry {
                event_type: event_type.to_string(),
                tx,
            },
        );
        EventStream::new(id, rx, Arc::downgrade(self))
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().streams.remove(&id);
    }

    /// Number of listeners and subscriptions registered for `event_type`.
    #[must_use]
    pub fn listener_count(&self, event_type: &str) -> usize {
        let guard = self.lock();
        guard
            .streams
            .values()
            .filter(|s| s.event_type == event_type)
            .count()
            + guard
                .callbacks
                .values()
                .filter(|c| c.event_type == event_type)
                .count()
    }

    /// Deliver `event` to everything registered for its type.
    ///
    /// Returns the number of deliveries made. Listeners run after the internal
    /// lock is released, so they may add or remove listeners or dispatch.
    pub fn dispatch_event(&self, event: &CustomEvent) -> usize {
        let (senders, callbacks): (Vec<Sender<CustomEvent>>, Vec<EventListener>) = {
            let guard = self.lock();
            (
                guard
                    .streams
                    .values()
                    .filter(|s| s.event_type == event.event_type)
                    .map(|s| s.tx.clone())
                    .collect(),
                guard
                    .callbacks
                    .values()
                    .filter(|c| c.event_type == event.event_type)
                    .map(|c| Arc::clone(&c.listener))
                    .collect(),
            )
        };

        let mut delivered = 0;
        for tx in senders {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        for listener in callbacks {
            listener(event);
            delivered += 1;
        }
        delivered
    }

    /// Events a slow or vanished subscriber missed.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.lock();
        f.debug_struct("Document")
            .field("streams", &guard.streams.len())
            .field("callbacks", &guard.callbacks.len())
            .field("dropped_events", &self.dropped_events())
            .finish()
    }
}

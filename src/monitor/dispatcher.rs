//! Cart update broadcasting.
//!
//! Each dispatch builds one `CartUpdateEvent` and delivers it on the document
//! as a bubbling `tinker:cart-update` event. Dispatch is a pure side effect:
//! it cannot fail from the caller's point of view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CART_UPDATE_EVENT;
use crate::host::{CustomEvent, Document};

use super::event::{CartSnapshot, CartUpdateEvent, UpdateSource};

/// Broadcasts cart updates on the document.
#[derive(Debug)]
pub struct EventDispatcher {
    document: Arc<Document>,
    debug: bool,
    dispatched: AtomicU64,
}

impl EventDispatcher {
    /// Dispatcher for `document`. `debug` enables dispatch logging.
    #[must_use]
    pub fn new(document: Arc<Document>, debug: bool) -> Self {
        Self {
            document,
            debug,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Broadcast one cart update.
    pub fn dispatch(&self, cart: CartSnapshot, source: UpdateSource) {
        let event = CartUpdateEvent::new(cart, source);
        let detail = match serde_json::to_value(&event) {
            Ok(detail) => detail,
            Err(err) => {
                // Unreachable for JSON-backed snapshots; never surface it.
                warn!(target: "cartwatch", error = %err, "failed to encode cart update");
                return;
            }
        };

        if self.debug {
            debug!(
                target: "cartwatch",
                %source,
                items = event.cart.item_count(),
                timestamp = %event.timestamp,
                "cart updated"
            );
        }

        let delivered = self
            .document
            .dispatch_event(&CustomEvent::bubbling(CART_UPDATE_EVENT, detail));
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        if self.debug {
            debug!(target: "cartwatch", delivered, "cart update delivered");
        }
    }

    /// Number of events dispatched so far.
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatch_emits_bubbling_cart_update() {
        let doc = Arc::new(Document::new());
        let stream = doc.subscribe(CART_UPDATE_EVENT);
        let dispatcher = EventDispatcher::new(Arc::clone(&doc), false);

        dispatcher.dispatch(
            CartSnapshot::new(json!({"items": [{"id": 123, "quantity": 1}]})),
            UpdateSource::Fetch,
        );

        let ev = stream.try_recv().unwrap().unwrap();
        assert_eq!(ev.event_type, CART_UPDATE_EVENT);
        assert!(ev.bubbles);

        let update = CartUpdateEvent::from_event(&ev).unwrap();
        assert_eq!(update.source, UpdateSource::Fetch);
        assert_eq!(update.cart.item_count(), 1);
        assert!(update.timestamp.ends_with('Z'));
        assert_eq!(dispatcher.dispatched(), 1);
    }

    #[test]
    fn dispatch_without_listeners_is_harmless() {
        let dispatcher = EventDispatcher::new(Arc::new(Document::new()), true);
        dispatcher.dispatch(CartSnapshot::new(json!({"items": []})), UpdateSource::Observer);
        assert_eq!(dispatcher.dispatched(), 1);
    }

    #[test]
    fn each_dispatch_is_a_distinct_event() {
        let doc = Arc::new(Document::new());
        let stream = doc.subscribe(CART_UPDATE_EVENT);
        let dispatcher = EventDispatcher::new(Arc::clone(&doc), false);

        dispatcher.dispatch(CartSnapshot::new(json!({"items": []})), UpdateSource::Xhr);
        dispatcher.dispatch(CartSnapshot::new(json!({"items": []})), UpdateSource::Xhr);

        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].event_id, events[1].event_id);
    }
}

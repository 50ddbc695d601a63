use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{MonitorError, MonitorResult};

use super::document::{CustomEvent, Document, SubscriptionId};

/// A subscription stream for document events.
///
/// Dropping this stream unsubscribes it.
///

#[derive(Debug)]
pub struct EventStream {
    subscription_id: SubscriptionId,
    rx: Receiver<CustomEvent>,
    document: Weak<Document>,
    unregistered: AtomicBool,
}

impl EventStream {
    pub(crate) fn new(
        subscription_id: SubscriptionId,
        rx: Receiver<CustomEvent>,
        document: Weak<Document>,
    ) -> Self {
        Self {
            subscription_id,
            rx,
            document,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The subscription id backing this stream.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Explicit unsubscription.
    ///
    /// Idempotent. Events already buffered can still be received; after that
    /// the stream reports disconnected.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(document) = self.document.upgrade() {
            document.unsubscribe(self.subscription_id);
        }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> MonitorResult<CustomEvent> {
        self.rx.recv().map_err(|_| MonitorError::Disconnected {
            path: "event_stream".to_string(),
        })
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> MonitorResult<CustomEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => MonitorError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            RecvTimeoutError::Disconnected => MonitorError::Disconnected {
                path: "event_stream".to_string(),
            },
        })
    }

    /// Receive a buffered event without blocking.
    pub fn try_recv(&self) -> MonitorResult<Option<CustomEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(MonitorError::Disconnected {
                path: "event_stream".to_string(),
            }),
        }
    }

    /// Take every buffered event.
    #[must_use]
    pub fn drain(&self) -> Vec<CustomEvent> {
        self.rx.try_iter().collect()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn unsubscribe_disconnects_after_drain() {
        let doc = Arc::new(Document::new());
        let stream = doc.subscribe("cart");
        doc.dispatch_event(&CustomEvent::new("cart", json!(1)));

        stream.unsubscribe();
        stream.unsubscribe();
        assert_eq!(doc.listener_count("cart"), 0);

        assert_eq!(stream.try_recv().unwrap().unwrap().detail, json!(1));
        assert!(matches!(
            stream.try_recv(),
            Err(MonitorError::Disconnected { .. })
        ));
    }

    #[test]
    fn drop_unsubscribes() {
        let doc = Arc::new(Document::new());
        {
            let _stream = doc.subscribe("cart");
            assert_eq!(doc.listener_count("cart"), 1);
        }
        assert_eq!(doc.listener_count("cart"), 0);
    }

    #[test]
    fn recv_timeout_reports_timeout() {
        let doc = Arc::new(Document::new());
        let stream = doc.subscribe("cart");
        let err = stream.recv_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn dropping_document_disconnects_stream() {
        let doc = Arc::new(Document::new());
        let stream = doc.subscribe("cart");
        drop(doc);
        assert!(matches!(stream.recv(), Err(MonitorError::Disconnected { .. })));
    }
}

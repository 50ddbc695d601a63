//! Per-frame coalescing of detections.
//!
//! One user action can fire several cart requests back to back. The first
//! detection in a frame schedules a refetch-and-dispatch cycle for the next
//! frame; detections arriving before that frame runs are absorbed into it.
//! Detections in later frames get their own cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

use crate::host::FrameScheduler;

use super::dispatcher::EventDispatcher;
use super::event::{CartSnapshot, Detection, UpdateSource};
use super::fetcher::CartStateFetcher;

#[derive(Debug, Default)]
struct PendingCycle {
    scheduled: bool,
    latest: Option<Detection>,
}

/// Turns bursts of detections into single refetch/dispatch cycles.
pub struct UpdateCoalescer {
    frames: Arc<dyn FrameScheduler>,
    fetcher: CartStateFetcher,
    dispatcher: EventDispatcher,
    debug: bool,
    pending: Mutex<PendingCycle>,
    closed: AtomicBool,
    scheduled_cycles: AtomicU64,
    absorbed_signals: AtomicU64,
}

impl UpdateCoalescer {
    pub(crate) fn new(
        frames: Arc<dyn FrameScheduler>,
        fetcher: CartStateFetcher,
        dispatcher: EventDispatcher,
        debug: bool,
    ) -> Self {
        Self {
            frames,
            fetcher,
            dispatcher,
            debug,
            pending: Mutex::new(PendingCycle::default()),
            closed: AtomicBool::new(false),
            scheduled_cycles: AtomicU64::new(0),
            absorbed_signals: AtomicU64::new(0),
        }
    }

    /// Report a detection. Schedules a cycle unless one is already pending.
    pub(crate) fn signal(self: &Arc<Self>, detection: Detection) {
        if self.is_closed() {
            return;
        }

        let schedule = {
            let mut pending = self.lock_pending();
            pending.latest = Some(detection);
            if pending.scheduled {
                false
            } else {
                pending.scheduled = true;
                true
            }
        };

        if !schedule {
            self.absorbed_signals.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.scheduled_cycles.fetch_add(1, Ordering::Relaxed);
        let this = Arc::downgrade(self);
        self.frames.request_frame(Box::new(move || run_cycle(&this)));
    }

    /// Fetch the cart on the next frame and dispatch it as a page-load update
    /// if it already has items.
    pub(crate) fn schedule_load_check(self: &Arc<Self>) {
        let this = Arc::downgrade(self);
        self.frames.request_frame(Box::new(move || {
            if let Some(this) = this.upgrade() {
                this.check_on_load();
            }
        }));
    }

    /// Stop scheduling. Pending cycles run but dispatch nothing.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut pending = self.lock_pending();
        pending.latest = None;
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cycles scheduled so far.
    #[must_use]
    pub fn scheduled_cycles(&self) -> u64 {
        self.scheduled_cycles.load(Ordering::Relaxed)
    }

    /// Detections absorbed into an already pending cycle.
    #[must_use]
    pub fn absorbed_signals(&self) -> u64 {
        self.absorbed_signals.load(Ordering::Relaxed)
    }

    /// The dispatcher cycles deliver through.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    fn flush(&self) {
        let detection = {
            let mut pending = self.lock_pending();
            pending.scheduled = false;
            pending.latest.take()
        };

        let Some(detection) = detection else {
            return;
        };
        if self.is_closed() {
            return;
        }

        let Some(cart) = self.resolve(detection.body.as_deref()) else {
            return;
        };

        // The fetch may have outlived a disconnect.
        if self.is_closed() {
            return;
        }
        self.dispatcher.dispatch(cart, detection.source);
    }

    /// Cart to dispatch: the intercepted body when it parses, otherwise the
    /// canonical cart state.
    fn resolve(&self, body: Option<&[u8]>) -> Option<CartSnapshot> {
        if let Some(body) = body {
            match CartSnapshot::from_slice(body) {
                Ok(cart) => return Some(cart),
                Err(err) => {
                    if self.debug {
                        debug!(target: "cartwatch", error = %err, "intercepted cart response is not JSON; refetching");
                    }
                }
            }
        }

        match self.fetcher.fetch_cart_state() {
            Ok(cart) => Some(cart),
            Err(err) => {
                if self.debug {
                    debug!(target: "cartwatch", error = %err, "error fetching cart data");
                }
                None
            }
        }
    }

    fn check_on_load(&self) {
        if self.is_closed() {
            return;
        }
        match self.fetcher.fetch_cart_state() {
            Ok(cart) if cart.has_items() => {
                if !self.is_closed() {
                    self.dispatcher.dispatch(cart, UpdateSource::PageLoad);
                }
            }
            Ok(_) => {}
            Err(err) => {
                if self.debug {
                    debug!(target: "cartwatch", error = %err, "error fetching cart on page load");
                }
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingCycle> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_cycle(this: &Weak<UpdateCoalescer>) {
    if let Some(this) = this.upgrade() {
        this.flush();
    }
}

impl std::fmt::Debug for UpdateCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoalescer")
            .field("closed", &self.is_closed())
            .field("scheduled_cycles", &self.scheduled_cycles())
            .field("absorbed_signals", &self.absorbed_signals())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CART_UPDATE_EVENT;
    use crate::host::{Document, EventStream, ManualFrames, Method, StubFetch};
    use crate::monitor::event::CartUpdateEvent;
    use serde_json::json;
    use url::Url;

    struct Rig {
        frames: Arc<ManualFrames>,
        stub: Arc<StubFetch>,
        coalescer: Arc<UpdateCoalescer>,
        stream: EventStream,
    }

    fn rig() -> Rig {
        let frames = Arc::new(ManualFrames::new());
        let stub = Arc::new(StubFetch::new());
        stub.respond_json(Method::Get, "/cart.js", &json!({"items": [{"id": 9}]}));
        let doc = Arc::new(Document::new());
        let stream = doc.subscribe(CART_UPDATE_EVENT);

        let origin = Url::parse("https://shop.example").unwrap();
        let fetcher = CartStateFetcher::new(stub.clone(), &origin, "/cart.js").unwrap();
        let coalescer = Arc::new(UpdateCoalescer::new(
            frames.clone(),
            fetcher,
            EventDispatcher::new(doc, false),
            false,
        ));

        Rig {
            frames,
            stub,
            coalescer,
            stream,
        }
    }

    fn updates(stream: &EventStream) -> Vec<CartUpdateEvent> {
        stream
            .drain()
            .iter()
            .filter_map(CartUpdateEvent::from_event)
            .collect()
    }

    #[test]
    fn burst_within_a_frame_yields_one_cycle() {
        let r = rig();
        for _ in 0..5 {
            r.coalescer.signal(Detection::observed());
        }
        assert_eq!(r.frames.pending(), 1);
        assert_eq!(r.coalescer.scheduled_cycles(), 1);
        assert_eq!(r.coalescer.absorbed_signals(), 4);

        r.frames.advance();
        let got = updates(&r.stream);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source, UpdateSource::Observer);
        assert_eq!(r.stub.request_count(Method::Get, "/cart.js"), 1);
    }

    #[test]
    fn signals_in_separate_frames_each_dispatch() {
        let r = rig();
        r.coalescer.signal(Detection::observed());
        r.frames.advance();
        r.coalescer.signal(Detection::observed());
        r.frames.advance();

        assert_eq!(updates(&r.stream).len(), 2);
        assert_eq!(r.coalescer.scheduled_cycles(), 2);
    }

    #[test]
    fn intercepted_body_is_dispatched_without_refetch() {
        let r = rig();
        r.coalescer.signal(Detection::intercepted(
            UpdateSource::Fetch,
            br#"{"items":[{"id":1},{"id":2}]}"#.to_vec(),
        ));
        r.frames.advance();

        let got = updates(&r.stream);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source, UpdateSource::Fetch);
        assert_eq!(got[0].cart.item_count(), 2);
        assert_eq!(r.stub.request_count(Method::Get, "/cart.js"), 0);
    }

    #[test]
    fn latest_detection_in_frame_wins() {
        let r = rig();
        r.coalescer.signal(Detection::intercepted(UpdateSource::Xhr, br#"{"items":[]}"#.to_vec()));
        r.coalescer.signal(Detection::intercepted(
            UpdateSource::Fetch,
            br#"{"items":[{"id":3}]}"#.to_vec(),
        ));
        r.frames.advance();

        let got = updates(&r.stream);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source, UpdateSource::Fetch);
        assert_eq!(got[0].cart.item_count(), 1);
    }

    #[test]
    fn unparsable_body_falls_back_to_cart_state() {
        let r = rig();
        r.coalescer
            .signal(Detection::intercepted(UpdateSource::Xhr, b"<html>redirect</html>".to_vec()));
        r.frames.advance();

        let got = updates(&r.stream);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source, UpdateSource::Xhr);
        assert_eq!(got[0].cart.item_count(), 1);
        assert_eq!(r.stub.request_count(Method::Get, "/cart.js"), 1);
    }

    #[test]
    fn failed_refetch_dispatches_nothing() {
        let r = rig();
        r.stub.fail(Method::Get, "/cart.js", "offline");
        r.coalescer.signal(Detection::observed());
        r.frames.advance();
        assert!(updates(&r.stream).is_empty());

        // The next mutation is the retry.
        r.stub.respond_json(Method::Get, "/cart.js", &json!({"items": []}));
        r.coalescer.signal(Detection::observed());
        r.frames.advance();
        assert_eq!(updates(&r.stream).len(), 1);
    }

    #[test]
    fn close_cancels_pending_cycle_and_future_signals() {
        let r = rig();
        r.coalescer.signal(Detection::observed());
        r.coalescer.close();
        r.frames.advance();
        assert!(updates(&r.stream).is_empty());

        r.coalescer.signal(Detection::observed());
        assert_eq!(r.frames.pending(), 0);
        assert!(r.coalescer.is_closed());
    }

    #[test]
    fn load_check_dispatches_only_non_empty_carts() {
        let r = rig();
        r.coalescer.schedule_load_check();
        assert!(updates(&r.stream).is_empty());
        r.frames.advance();

        let got = updates(&r.stream);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source, UpdateSource::PageLoad);

        r.stub.respond_json(Method::Get, "/cart.js", &json!({"items": []}));
        r.coalescer.schedule_load_check();
        r.frames.advance();
        assert!(updates(&r.stream).is_empty());
    }

    #[test]
    fn dropped_coalescer_turns_queued_frames_into_no_ops() {
        let r = rig();
        r.coalescer.signal(Detection::observed());
        let frames = Arc::clone(&r.frames);
        let stream = r.stream;
        drop(r.coalescer);
        assert_eq!(frames.advance(), 1);
        assert!(updates(&stream).is_empty());
    }
}

//! Cart activity monitoring.
//!
//! `initialize_cart_monitor` wires a detection strategy into a page and returns
//! a handle. Detections from either strategy flow through one coalescer, which
//! resolves the cart contents once per frame and broadcasts a
//! `tinker:cart-update` event on the document.
//!
//! The monitor never changes what the page sees: intercepted calls keep their
//! arguments, results and errors, and failures inside the monitor are logged
//! (in debug mode) and swallowed.

/// Active strategy: request primitive decorators.
pub mod active;
/// Per-frame coalescing of detections.
pub mod coalescer;
/// Event broadcasting.
pub mod dispatcher;
/// Cart snapshot and update event types.
pub mod event;
/// Canonical cart-state reads.
pub mod fetcher;
/// Endpoint matching.
pub mod matcher;
/// Passive strategy: resource-timeline observation.
pub mod passive;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{DetectionStrategy, MonitorConfig, CART_UPDATE_EVENT};
use crate::error::MonitorResult;
use crate::host::{CustomEvent, Document, ListenerId, PageHost};

pub use active::{ActiveInterception, ACTIVE_INTERCEPTION_KEY};
pub use coalescer::UpdateCoalescer;
pub use dispatcher::EventDispatcher;
pub use event::{CartSnapshot, CartUpdateEvent, UpdateSource};
pub use fetcher::CartStateFetcher;
pub use matcher::EndpointMatcher;
pub use passive::PassiveObservation;

/// The installed detection strategy.
#[derive(Debug)]
pub enum Detector {
    /// Fetch and xhr decorators.
    Active(ActiveInterception),
    /// Resource-timeline observer.
    Passive(PassiveObservation),
}

impl Detector {
    fn install(
        strategy: DetectionStrategy,
        host: &PageHost,
        matcher: &Arc<EndpointMatcher>,
        coalescer: &Arc<UpdateCoalescer>,
        debug: bool,
    ) -> MonitorResult<Self> {
        match strategy {
            DetectionStrategy::Active => ActiveInterception::install(
                host.network(),
                Arc::clone(matcher),
                Arc::clone(coalescer),
                debug,
            )
            .map(Self::Active),
            DetectionStrategy::Passive => Ok(Self::Passive(PassiveObservation::install(
                host,
                Arc::clone(matcher),
                coalescer,
                debug,
            ))),
        }
    }

    /// Strategy this detector implements.
    #[must_use]
    pub const fn strategy(&self) -> DetectionStrategy {
        match self {
            Self::Active(_) => DetectionStrategy::Active,
            Self::Passive(_) => DetectionStrategy::Passive,
        }
    }

    fn disconnect(&self) {
        match self {
            Self::Active(active) => active.disconnect(),
            Self::Passive(passive) => passive.disconnect(),
        }
    }
}

/// A running monitor.
///
/// Dropping the handle disconnects it.
#[derive(Debug)]
pub struct MonitorHandle {
    config: MonitorConfig,
    matcher: Arc<EndpointMatcher>,
    coalescer: Arc<UpdateCoalescer>,
    detector: Detector,
    document: Arc<Document>,
    debug_listener: Option<ListenerId>,
    disconnected: AtomicBool,
}

impl MonitorHandle {
    /// True if `url` is one of the configured cart endpoints.
    #[must_use]
    pub fn is_cart_endpoint(&self, url: &str) -> bool {
        self.matcher.is_cart_endpoint(url)
    }

    /// Stop detecting and dispatching. Idempotent.
    ///
    /// Cycles already scheduled run but dispatch nothing. Decorators that
    /// other code has since wrapped stay in place as pass-throughs.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }

        self.coalescer.close();
        self.detector.disconnect();
        if let Some(id) = self.debug_listener {
            self.document.remove_event_listener(id);
        }

        if self.config.debug {
            info!(target: "cartwatch", strategy = ?self.detector.strategy(), "cart monitor disconnected");
        }
    }

    /// Whether `disconnect` has not been called yet.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire)
    }

    /// Configuration the monitor was started with.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Installed strategy.
    #[must_use]
    pub const fn strategy(&self) -> DetectionStrategy {
        self.detector.strategy()
    }

    /// Installed detector.
    #[must_use]
    pub const fn detector(&self) -> &Detector {
        &self.detector
    }

    /// Coalescer statistics and dispatch counters.
    #[must_use]
    pub fn coalescer(&self) -> &UpdateCoalescer {
        &self.coalescer
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Start monitoring cart activity on `host`.
///
/// # Errors
/// - `Config`: the configuration is invalid
/// - `AlreadyInstalled`: an active monitor is already running on the same
///   request primitives
pub fn initialize_cart_monitor(host: &PageHost, config: MonitorConfig) -> MonitorResult<MonitorHandle> {
    config.validate()?;

    let matcher = Arc::new(EndpointMatcher::new(
        host.origin().clone(),
        config.cart_endpoints.iter().cloned(),
    ));
    let fetcher = CartStateFetcher::new(
        host.network().base_fetch(),
        host.origin(),
        &config.cart_state_endpoint,
    )?;
    let dispatcher = EventDispatcher::new(Arc::clone(host.document()), config.debug);
    let coalescer = Arc::new(UpdateCoalescer::new(
        Arc::clone(host.frames()),
        fetcher,
        dispatcher,
        config.debug,
    ));

    let detector = Detector::install(config.strategy, host, &matcher, &coalescer, config.debug)?;

    let debug_listener = config.debug.then(|| {
        host.document().add_event_listener(
            CART_UPDATE_EVENT,
            Arc::new(|event: &CustomEvent| {
                debug!(target: "cartwatch", detail = %event.detail, "cart update event received");
            }),
        )
    });

    if config.debug {
        info!(
            target: "cartwatch",
            strategy = ?config.strategy,
            endpoints = config.cart_endpoints.len(),
            origin = %host.origin(),
            "cart monitor initialized"
        );
    }

    Ok(MonitorHandle {
        config,
        matcher,
        coalescer,
        detector,
        document: Arc::clone(host.document()),
        debug_listener,
        disconnected: AtomicBool::new(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{FetchBackedXhr, ManualFrames, Method, NetworkPrimitives, Request, StubFetch};
    use serde_json::json;
    use url::Url;

    fn page() -> (PageHost, Arc<ManualFrames>, Arc<StubFetch>) {
        let frames = Arc::new(ManualFrames::new());
        let stub = Arc::new(StubFetch::new());
        stub.respond_json(Method::Get, "/cart.js", &json!({"items": []}));
        stub.respond_json(Method::Post, "/cart/add.js", &json!({"items": [{"id": 1}]}));
        let network = Arc::new(NetworkPrimitives::new(
            stub.clone(),
            Arc::new(FetchBackedXhr::new(stub.clone())),
        ));
        let host = PageHost::new(
            Url::parse("https://shop.example").unwrap(),
            network,
            frames.clone(),
            Arc::new(Document::new()),
        );
        (host, frames, stub)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (host, _, _) = page();
        let err = initialize_cart_monitor(&host, MonitorConfig::default().with_cart_endpoints(Vec::<String>::new()))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn handle_reports_strategy_and_endpoint_matching() {
        let (host, _, _) = page();
        let handle = initialize_cart_monitor(&host, MonitorConfig::default()).unwrap();
        assert_eq!(handle.strategy(), DetectionStrategy::Active);
        assert!(handle.is_cart_endpoint("/cart/add.js"));
        assert!(!handle.is_cart_endpoint("/cart.js"));
        assert!(handle.is_connected());
    }

    #[test]
    fn debug_listener_is_removed_on_disconnect() {
        let (host, _, _) = page();
        let handle = initialize_cart_monitor(&host, MonitorConfig::default().with_debug(true)).unwrap();
        assert_eq!(host.document().listener_count(CART_UPDATE_EVENT), 1);

        handle.disconnect();
        assert_eq!(host.document().listener_count(CART_UPDATE_EVENT), 0);
        assert!(!handle.is_connected());
    }

    #[test]
    fn dropping_the_handle_disconnects() {
        let (host, frames, _) = page();
        let stream = host.document().subscribe(CART_UPDATE_EVENT);
        {
            let _handle = initialize_cart_monitor(&host, MonitorConfig::default()).unwrap();
        }
        assert!(!host.network().is_claimed(ACTIVE_INTERCEPTION_KEY));

        host.network().fetch(Request::new(Method::Post, "/cart/add.js")).unwrap();
        frames.advance();
        assert!(stream.drain().is_empty());
    }

    #[test]
    fn monitor_reads_cart_state_through_the_base_primitive() {
        let (host, frames, stub) = page();
        let stream = host.document().subscribe(CART_UPDATE_EVENT);
        let _handle = initialize_cart_monitor(
            &host,
            MonitorConfig::default().with_strategy(DetectionStrategy::Passive),
        )
        .unwrap();

        // The page-load read must not be mistaken for a cart mutation.
        frames.advance();
        assert_eq!(stub.request_count(Method::Get, "/cart.js"), 1);
        assert_eq!(frames.pending(), 0);
        assert!(stream.drain().is_empty());
    }
}

//! The page environment a monitor runs in.
//!
//! Nothing here is cart specific. A `PageHost` bundles the origin, the request
//! primitives, frame scheduling, the optional resource timeline, and the
//! document that events are dispatched on. Embedders build one per page and
//! hand it to `initialize_cart_monitor`.

/// Document event target and custom events.
pub mod document;
/// Rendering-frame scheduling.
pub mod frames;
/// Request primitives and the primitive registry.
pub mod network;
/// Resource-timing observation.
pub mod performance;
/// Document subscription stream handle.
pub mod stream;
/// In-process request primitives.
pub mod stub;

use std::sync::Arc;

use url::Url;

pub use document::{CustomEvent, Document, EventId, EventListener, ListenerId, SubscriptionId};
pub use frames::{FrameCallback, FrameScheduler, IntervalFrames, ManualFrames};
pub use network::{
    CompletionCallback, FetchLayer, FetchPrimitive, Method, NetworkPrimitives, Request, Response,
    XhrCompletion, XhrLayer, XhrPrimitive, XhrRequest,
};
pub use performance::{
    EntryType, ObserverCallback, ObserverId, PerformanceEntry, PerformanceTimeline, ResourceTimeline,
};
pub use stream::EventStream;
pub use stub::{FetchBackedXhr, StubFetch};

/// Everything a monitor needs from its page.
#[derive(Clone)]
pub struct PageHost {
    origin: Url,
    network: Arc<NetworkPrimitives>,
    frames: Arc<dyn FrameScheduler>,
    performance: Option<Arc<dyn PerformanceTimeline>>,
    document: Arc<Document>,
}

impl PageHost {
    /// A page without a performance timeline.
    #[must_use]
    pub fn new(
        origin: Url,
        network: Arc<NetworkPrimitives>,
        frames: Arc<dyn FrameScheduler>,
        document: Arc<Document>,
    ) -> Self {
        Self {
            origin,
            network,
            frames,
            performance: None,
            document,
        }
    }

    /// Attach a performance timeline.
    #[must_use]
    pub fn with_performance(mut self, timeline: Arc<dyn PerformanceTimeline>) -> Self {
        self.performance = Some(timeline);
        self
    }

    /// Page origin used to resolve relative URLs.
    #[must_use]
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Request primitives.
    #[must_use]
    pub fn network(&self) -> &Arc<NetworkPrimitives> {
        &self.network
    }

    /// Frame scheduler.
    #[must_use]
    pub fn frames(&self) -> &Arc<dyn FrameScheduler> {
        &self.frames
    }

    /// Performance timeline, if the page supports one.
    #[must_use]
    pub fn performance(&self) -> Option<&Arc<dyn PerformanceTimeline>> {
        self.performance.as_ref()
    }

    /// The document.
    #[must_use]
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }
}

impl std::fmt::Debug for PageHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHost")
            .field("origin", &self.origin.as_str())
            .field("network", &self.network)
            .field("performance", &self.performance.is_some())
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

//! Passive observation.
//!
//! Watches the page's resource timeline instead of touching the request
//! primitives. A batch containing any cart-endpoint entry becomes one
//! detection; response bodies are never visible here, so every cycle reads
//! the canonical cart state.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::host::{EntryType, ObserverCallback, ObserverId, PageHost, PerformanceEntry, PerformanceTimeline};

use super::coalescer::UpdateCoalescer;
use super::event::Detection;
use super::matcher::EndpointMatcher;

/// Resource-timeline observer.
pub struct PassiveObservation {
    timeline: Option<Arc<dyn PerformanceTimeline>>,
    observer: Mutex<Option<ObserverId>>,
}

impl PassiveObservation {
    /// Observe `host`'s timeline and schedule the page-load check.
    ///
    /// Without a timeline the observation is inert apart from the load check.
    pub(crate) fn install(
        host: &PageHost,
        matcher: Arc<EndpointMatcher>,
        coalescer: &Arc<UpdateCoalescer>,
        debug: bool,
    ) -> Self {
        let timeline = host.performance().cloned();

        let observer = match &timeline {
            Some(timeline) => {
                let coalescer = Arc::clone(coalescer);
                let callback: ObserverCallback = Arc::new(move |entries: &[PerformanceEntry]| {
                    let Some(entry) = entries.iter().find(|e| matcher.is_cart_endpoint(&e.name)) else {
                        return;
                    };
                    if debug {
                        debug!(target: "cartwatch", url = %entry.name, "detected cart request");
                    }
                    coalescer.signal(Detection::observed());
                });
                Some(timeline.observe(&[EntryType::Resource], callback))
            }
            None => {
                warn!(target: "cartwatch", "PerformanceObserver not supported; passive cart detection is disabled");
                None
            }
        };

        coalescer.schedule_load_check();

        Self {
            timeline,
            observer: Mutex::new(observer),
        }
    }

    /// Whether an observer is registered.
    #[must_use]
    pub fn is_observing(&self) -> bool {
        self.observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn disconnect(&self) {
        let id = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(id), Some(timeline)) = (id, &self.timeline) {
            timeline.disconnect(id);
        }
    }
}

impl std::fmt::Debug for PassiveObservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassiveObservation")
            .field("observing", &self.is_observing())
            .finish_non_exhaustive()
    }
}

//! Active interception.
//!
//! Decorates the page's fetch and xhr primitives. Cart-mutating calls are
//! reported to the coalescer with a copy of their response body; every call,
//! cart or not, reaches the wrapped primitive unchanged and its outcome
//! reaches the caller unchanged.
//!
//! Decorators are layered over whatever is installed at the time, so other
//! code wrapping the same primitives keeps working. Only one active
//! interceptor may be installed per `NetworkPrimitives`; the claim is released
//! on disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{MonitorResult, NetworkError};
use crate::host::{
    FetchLayer, FetchPrimitive, Method, NetworkPrimitives, Request, Response, XhrCompletion,
    XhrLayer, XhrPrimitive, XhrRequest,
};

use super::coalescer::UpdateCoalescer;
use super::event::{Detection, UpdateSource};
use super::matcher::EndpointMatcher;

/// Ownership key claimed on the primitive registry.
pub const ACTIVE_INTERCEPTION_KEY: &str = "cartwatch/active-interception";

/// State shared by both decorators.
struct Instrumentation {
    matcher: Arc<EndpointMatcher>,
    coalescer: Arc<UpdateCoalescer>,
    active: AtomicBool,
    debug: bool,
}

impl Instrumentation {
    fn watches(&self, url: &str) -> bool {
        self.active.load(Ordering::Acquire) && self.matcher.is_cart_endpoint(url)
    }

    fn report(&self, source: UpdateSource, body: Vec<u8>) {
        if self.active.load(Ordering::Acquire) {
            self.coalescer.signal(Detection::intercepted(source, body));
        }
    }
}

struct InterceptingFetch {
    inner: Arc<dyn FetchPrimitive>,
    shared: Arc<Instrumentation>,
}

impl FetchPrimitive for InterceptingFetch {
    fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        if !self.shared.watches(&request.url) {
            return self.inner.fetch(request);
        }

        if self.shared.debug {
            debug!(target: "cartwatch", method = %request.method, url = %request.url, "intercepted fetch cart request");
        }

        match self.inner.fetch(request) {
            Ok(response) => {
                if response.is_success() {
                    // The caller gets the original; the monitor reads a copy.
                    self.shared.report(UpdateSource::Fetch, response.body.clone());
                }
                Ok(response)
            }
            Err(err) => {
                if self.shared.debug {
                    debug!(target: "cartwatch", error = %err, "cart fetch failed");
                }
                Err(err)
            }
        }
    }
}

struct InterceptingXhr {
    inner: Arc<dyn XhrPrimitive>,
    shared: Arc<Instrumentation>,
}

impl XhrPrimitive for InterceptingXhr {
    fn open(&self, method: Method, url: &str) -> XhrRequest {
        self.inner.open(method, url)
    }

    fn send(&self, mut request: XhrRequest, body: Option<Vec<u8>>) {
        if self.shared.watches(request.url()) {
            if self.shared.debug {
                debug!(target: "cartwatch", method = %request.method(), url = %request.url(), "intercepted xhr cart request");
            }

            let original = request.take_on_complete();
            let shared = Arc::clone(&self.shared);
            request.set_on_complete(Box::new(move |done: &XhrCompletion| {
                if done.is_success() {
                    shared.report(UpdateSource::Xhr, done.response_text.clone().into_bytes());
                }
                if let Some(original) = original {
                    original(done);
                }
            }));
        }

        self.inner.send(request, body);
    }
}

/// Installed fetch and xhr decorators.
pub struct ActiveInterception {
    network: Arc<NetworkPrimitives>,
    shared: Arc<Instrumentation>,
    fetch_layer: FetchLayer,
    xhr_layer: XhrLayer,
    released: AtomicBool,
}

impl ActiveInterception {
    pub(crate) fn install(
        network: &Arc<NetworkPrimitives>,
        matcher: Arc<EndpointMatcher>,
        coalescer: Arc<UpdateCoalescer>,
        debug: bool,
    ) -> MonitorResult<Self> {
        network.claim(ACTIVE_INTERCEPTION_KEY)?;

        let shared = Arc::new(Instrumentation {
            matcher,
            coalescer,
            active: AtomicBool::new(true),
            debug,
        });

        let fetch_layer = network.wrap_fetch(|inner| {
            Arc::new(InterceptingFetch {
                inner,
                shared: Arc::clone(&shared),
            })
        });
        let xhr_layer = network.wrap_xhr(|inner| {
            Arc::new(InterceptingXhr {
                inner,
                shared: Arc::clone(&shared),
            })
        });

        Ok(Self {
            network: Arc::clone(network),
            shared,
            fetch_layer,
            xhr_layer,
            released: AtomicBool::new(false),
        })
    }

    /// Whether the decorators are still reporting.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub(crate) fn disconnect(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        // Buried layers cannot be removed; they stay in the chain as pass-throughs.
        self.shared.active.store(false, Ordering::Release);
        let fetch_removed = self.network.unwrap_fetch(&self.fetch_layer);
        let xhr_removed = self.network.unwrap_xhr(&self.xhr_layer);
        self.network.release(ACTIVE_INTERCEPTION_KEY);

        if self.shared.debug {
            debug!(target: "cartwatch", fetch_removed, xhr_removed, "active interception disconnected");
        }
    }
}

impl std::fmt::Debug for ActiveInterception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveInterception")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

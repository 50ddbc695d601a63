//! Network request primitives and the registry that owns them.
//!
//! A page exposes two request primitives: a promise-style `fetch` that returns
//! the response to its caller, and a callback-style request object (`xhr`) that
//! is opened, sent, and completes by invoking a callback. Both are trait
//! objects held by `NetworkPrimitives`. Instrumentation never replaces a
//! primitive outright; it wraps the current one, so several decorators can be
//! stacked by independent code and each keeps delegating to whatever was
//! installed before it.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult, NetworkError};

/// HTTP request method.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        };
        f.write_str(s)
    }
}

/// An outgoing request. `url` may be relative to the page origin.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// A bodiless request.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// A POST request carrying a JSON body.
    #[must_use]
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        let mut req = Self::new(Method::Post, url);
        req.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        req.body = Some(body.to_string().into_bytes());
        req
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A completed response.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    /// A response with the given status and body.
    #[must_use]
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A 200 response with a JSON body.
    #[must_use]
    pub fn json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        let mut res = Self::new(200, url, body.to_string().into_bytes());
        res.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        res
    }

    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Body as UTF-8 text (lossy).
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn parse_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Promise-style request primitive.
pub trait FetchPrimitive: Send + Sync {
    /// Perform the request, returning the response or the network failure.
    ///
    /// HTTP error statuses are successful responses; only transport failures
    /// are errors.
    fn fetch(&self, request: Request) -> Result<Response, NetworkError>;
}

/// State of a callback-style request when it reaches DONE.
///
/// `status` is 0 when the request failed at the network level.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XhrCompletion {
    pub status: u16,
    pub url: String,
    pub response_text: String,
}

impl XhrCompletion {
    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Completion callback of a callback-style request.
pub type CompletionCallback = Box<dyn FnOnce(&XhrCompletion) + Send>;

/// An opened, not yet sent, callback-style request.
///
/// The method and target URL are fixed when the request is opened and are
/// available to anything that sees the request at send time.
pub struct XhrRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    on_complete: Option<CompletionCallback>,
}

impl XhrRequest {
    /// Open a request. Primitives call this from `XhrPrimitive::open`.
    #[must_use]
    pub fn opened(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            on_complete: None,
        }
    }

    /// Method recorded at open time.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Target URL recorded at open time.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Headers set so far.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Set a request header.
    pub fn set_request_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Install the completion callback, replacing any previous one.
    pub fn set_on_complete(&mut self, callback: CompletionCallback) {
        self.on_complete = Some(callback);
    }

    /// Remove and return the completion callback.
    pub fn take_on_complete(&mut self) -> Option<CompletionCallback> {
        self.on_complete.take()
    }

    /// Whether a completion callback is installed.
    #[must_use]
    pub fn has_on_complete(&self) -> bool {
        self.on_complete.is_some()
    }
}

impl fmt::Debug for XhrRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XhrRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Callback-style request primitive.
pub trait XhrPrimitive: Send + Sync {
    /// Open a request for `method` and `url`.
    fn open(&self, method: Method, url: &str) -> XhrRequest;

    /// Send an opened request. The completion callback, if any, is invoked
    /// exactly once when the request reaches DONE.
    fn send(&self, request: XhrRequest, body: Option<Vec<u8>>);
}

/// One mutable primitive slot.
struct Slot<T: ?Sized> {
    current: RwLock<Arc<T>>,
}

impl<T: ?Sized> Slot<T> {
    fn new(initial: Arc<T>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    fn current(&self) -> Arc<T> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn wrap<F>(&self, wrap: F) -> Layer<T>
    where
        F: FnOnce(Arc<T>) -> Arc<T>,
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let inner = Arc::clone(&guard);
        let installed = wrap(Arc::clone(&inner));
        *guard = Arc::clone(&installed);
        Layer { installed, inner }
    }

    fn unwrap(&self, layer: &Layer<T>) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if std::ptr::addr_eq(Arc::as_ptr(&guard), Arc::as_ptr(&layer.installed)) {
            *guard = Arc::clone(&layer.inner);
            true
        } else {
            false
        }
    }
}

/// A decorator installed over a primitive, together with what it wraps.
pub struct Layer<T: ?Sized> {
    installed: Arc<T>,
    inner: Arc<T>,
}

impl<T: ?Sized> fmt::Debug for Layer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer").finish_non_exhaustive()
    }
}

/// Installed fetch decorator.
pub type FetchLayer = Layer<dyn FetchPrimitive>;
/// Installed xhr decorator.
pub type XhrLayer = Layer<dyn XhrPrimitive>;

/// The page's request primitives.
///
/// # Ownership
/// `claim` / `release` form a registry of exclusive instrumentation owners.
/// Code that must be the only one of its kind patching the primitives claims
/// a key first; a second claim on the same key fails until released.
pub struct NetworkPrimitives {
    base_fetch: Arc<dyn FetchPrimitive>,
    fetch: Slot<dyn FetchPrimitive>,
    xhr: Slot<dyn XhrPrimitive>,
    owners: Mutex<HashSet<String>>,
}

impl NetworkPrimitives {
    /// Create the registry with undecorated primitives.
    #[must_use]
    pub fn new(fetch: Arc<dyn FetchPrimitive>, xhr: Arc<dyn XhrPrimitive>) -> Self {
        Self {
            base_fetch: Arc::clone(&fetch),
            fetch: Slot::new(fetch),
            xhr: Slot::new(xhr),
            owners: Mutex::new(HashSet::new()),
        }
    }

    /// Issue a request through the current (outermost) fetch primitive.
    pub fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        self.fetch.current().fetch(request)
    }

    /// Open a request on the current xhr primitive.
    #[must_use]
    pub fn open(&self, method: Method, url: &str) -> XhrRequest {
        self.xhr.current().open(method, url)
    }

    /// Send a request through the current xhr primitive.
    pub fn send(&self, request: XhrRequest, body: Option<Vec<u8>>) {
        self.xhr.current().send(request, body);
    }

    /// The current outermost fetch primitive.
    #[must_use]
    pub fn fetch_primitive(&self) -> Arc<dyn FetchPrimitive> {
        self.fetch.current()
    }

    /// The current outermost xhr primitive.
    #[must_use]
    pub fn xhr_primitive(&self) -> Arc<dyn XhrPrimitive> {
        self.xhr.current()
    }

    /// The undecorated fetch primitive the registry was created with.
    #[must_use]
    pub fn base_fetch(&self) -> Arc<dyn FetchPrimitive> {
        Arc::clone(&self.base_fetch)
    }

    /// Install a fetch decorator over the current primitive.
    pub fn wrap_fetch<F>(&self, wrap: F) -> FetchLayer
    where
        F: FnOnce(Arc<dyn FetchPrimitive>) -> Arc<dyn FetchPrimitive>,
    {
        self.fetch.wrap(wrap)
    }

    /// Install an xhr decorator over the current primitive.
    pub fn wrap_xhr<F>(&self, wrap: F) -> XhrLayer
    where
        F: FnOnce(Arc<dyn XhrPrimitive>) -> Arc<dyn XhrPrimitive>,
    {
        self.xhr.wrap(wrap)
    }

    /// Remove a fetch decorator if it is still the outermost one.
    ///
    /// Returns false when something else has wrapped it since; the layer then
    /// stays in the chain and must make itself a pass-through.
    pub fn unwrap_fetch(&self, layer: &FetchLayer) -> bool {
        self.fetch.unwrap(layer)
    }

    /// Remove an xhr decorator if it is still the outermost one.
    pub fn unwrap_xhr(&self, layer: &XhrLayer) -> bool {
        self.xhr.unwrap(layer)
    }

    /// Claim exclusive instrumentation ownership under `key`.
    pub fn claim(&self, key: &str) -> MonitorResult<()> {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        if !owners.insert(key.to_string()) {
            return Err(MonitorError::AlreadyInstalled {
                owner: key.to_string(),
            });
        }
        Ok(())
    }

    /// Release a claim. Releasing an unclaimed key is a no-op.
    pub fn release(&self, key: &str) {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        owners.remove(key);
    }

    /// Whether `key` is currently claimed.
    #[must_use]
    pub fn is_claimed(&self, key: &str) -> bool {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

impl fmt::Debug for NetworkPrimitives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("NetworkPrimitives")
            .field("owners", &*owners)
            .finish_non_exhaustive()
    }
}

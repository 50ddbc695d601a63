//! In-process request primitives.
//!
//! `StubFetch` answers requests from a route table and records what it served,
//! which makes it the storefront backend for embedded use and tests.
//! `FetchBackedXhr` provides the callback-style primitive on top of any fetch
//! primitive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use url::Url;

use crate::error::NetworkError;

use super::network::{FetchPrimitive, Method, Request, Response, XhrCompletion, XhrPrimitive, XhrRequest};

#[derive(Debug, Clone)]
enum Route {
    Respond { status: u16, body: Vec<u8> },
    Fail { message: String },
}

/// Route-table fetch primitive.
///
/// Routes are keyed by method and path; the query string is ignored. Requests
/// with no route get an empty 404.
#[derive(Debug, Default)]
pub struct StubFetch {
    routes: Mutex<HashMap<(Method, String), Route>>,
    served: Mutex<Vec<Request>>,
}

fn request_path(url: &str) -> String {
    // Base only matters for relative inputs; absolute URLs replace it.
    Url::parse("http://stub.invalid/")
        .and_then(|base| base.join(url))
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl StubFetch {
    /// Empty route table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method path` with `status` and a raw body.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (method, path.to_string()),
                Route::Respond {
                    status,
                    body: body.into(),
                },
            );
    }

    /// Answer `method path` with 200 and a JSON body.
    pub fn respond_json(&self, method: Method, path: &str, body: &serde_json::Value) {
        self.respond(method, path, 200, body.to_string().into_bytes());
    }

    /// Fail `method path` at the network level.
    pub fn fail(&self, method: Method, path: &str, message: impl Into<String>) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (method, path.to_string()),
                Route::Fail {
                    message: message.into(),
                },
            );
    }

    /// Every request served so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests served for `method path`.
    #[must_use]
    pub fn request_count(&self, method: Method, path: &str) -> usize {
        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method == method && request_path(&r.url) == path)
            .count()
    }
}

impl FetchPrimitive for StubFetch {
    fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        let key = (request.method, request_path(&request.url));
        let route = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let url = request.url.clone();

        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        match route {
            Some(Route::Respond { status, body }) => Ok(Response::new(status, url, body)),
            Some(Route::Fail { message }) => Err(NetworkError::Failed { url, message }),
            None => Ok(Response::new(404, url, Vec::new())),
        }
    }
}

/// Callback-style primitive that performs requests through a fetch primitive.
///
/// Requests complete synchronously inside `send`. A network failure completes
/// the request with status 0 and an empty body.
pub struct FetchBackedXhr {
    fetch: Arc<dyn FetchPrimitive>,
}

impl FetchBackedXhr {
    /// Wrap a fetch primitive.
    #[must_use]
    pub fn new(fetch: Arc<dyn FetchPrimitive>) -> Self {
        Self { fetch }
    }
}

impl std::fmt::Debug for FetchBackedXhr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchBackedXhr").finish_non_exhaustive()
    }
}

impl XhrPrimitive for FetchBackedXhr {
    fn open(&self, method: Method, url: &str) -> XhrRequest {
        XhrRequest::opened(method, url)
    }

    fn send(&self, mut request: XhrRequest, body: Option<Vec<u8>>) {
        let on_complete = request.take_on_complete();
        let outgoing = Request {
            method: request.method(),
            url: request.url().to_string(),
            headers: request.headers().to_vec(),
            body,
        };

        let completion = match self.fetch.fetch(outgoing) {
            Ok(res) => XhrCompletion {
                status: res.status,
                url: res.url.clone(),
                response_text: res.text(),
            },
            Err(err) => XhrCompletion {
                status: 0,
                url: err.url().to_string(),
                response_text: String::new(),
            },
        };

        if let Some(callback) = on_complete {
            callback(&completion);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stub_routes_by_method_and_path() {
        let stub = StubFetch::new();
        stub.respond_json(Method::Get, "/cart.js", &json!({"items": []}));

        let res = stub
            .fetch(Request::get("https://shop.example/cart.js?v=2"))
            .unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.parse_json().unwrap(), json!({"items": []}));

        let missing = stub.fetch(Request::new(Method::Post, "/cart.js")).unwrap();
        assert_eq!(missing.status, 404);

        assert_eq!(stub.request_count(Method::Get, "/cart.js"), 1);
        assert_eq!(stub.requests().len(), 2);
    }

    #[test]
    fn stub_failure_is_a_network_error() {
        let stub = StubFetch::new();
        stub.fail(Method::Get, "/cart.js", "offline");
        let err = stub.fetch(Request::get("/cart.js")).unwrap_err();
        assert_eq!(err, NetworkError::failed("/cart.js", "offline"));
    }

    #[test]
    fn xhr_completes_with_response_text() {
        let stub = Arc::new(StubFetch::new());
        stub.respond_json(Method::Post, "/cart/add.js", &json!({"id": 1}));
        let xhr = FetchBackedXhr::new(stub.clone());

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let mut req = xhr.open(Method::Post, "/cart/add.js");
        req.set_on_complete(Box::new(move |done: &XhrCompletion| {
            *sink.lock().unwrap() = Some(done.clone());
        }));
        xhr.send(req, Some(b"{}".to_vec()));

        let done = seen.lock().unwrap().clone().unwrap();
        assert_eq!(done.status, 200);
        assert_eq!(done.response_text, r#"{"id":1}"#);
        assert_eq!(stub.requests()[0].body.as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn xhr_network_failure_completes_with_status_zero() {
        let stub = Arc::new(StubFetch::new());
        stub.fail(Method::Post, "/cart/add.js", "reset");
        let xhr = FetchBackedXhr::new(stub);

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let mut req = xhr.open(Method::Post, "/cart/add.js");
        req.set_on_complete(Box::new(move |done: &XhrCompletion| {
            *sink.lock().unwrap() = Some(done.status);
        }));
        xhr.send(req, None);

        assert_eq!(*seen.lock().unwrap(), Some(0));
    }
}

//! Canonical cart-state reads.

use std::sync::Arc;

use url::Url;

use crate::error::{ConfigError, MonitorError, MonitorResult};
use crate::host::{FetchPrimitive, Request};

use super::event::CartSnapshot;

/// Reads the current cart from the cart-state endpoint.
///
/// Reads go through the undecorated fetch primitive so the monitor never sees
/// its own requests. There are no retries: the next detected mutation is the
/// retry.
pub struct CartStateFetcher {
    fetch: Arc<dyn FetchPrimitive>,
    endpoint: Url,
}

impl CartStateFetcher {
    /// Fetcher for `endpoint` resolved against `origin`.
    pub fn new(fetch: Arc<dyn FetchPrimitive>, origin: &Url, endpoint: &str) -> MonitorResult<Self> {
        let endpoint = origin.join(endpoint).map_err(|e| ConfigError::Malformed {
            message: format!("cart state endpoint '{endpoint}': {e}"),
        })?;
        Ok(Self { fetch, endpoint })
    }

    /// The resolved cart-state URL.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// GET the cart state.
    ///
    /// # Errors
    /// - `Network`: the request never completed
    /// - `HttpStatus`: the endpoint answered with a non-2xx status
    /// - `Parse`: the body is not JSON
    pub fn fetch_cart_state(&self) -> MonitorResult<CartSnapshot> {
        let response = self.fetch.fetch(Request::get(self.endpoint.as_str()))?;
        if !response.is_success() {
            return Err(MonitorError::HttpStatus {
                url: self.endpoint.to_string(),
                status: response.status,
            });
        }
        Ok(CartSnapshot::from_slice(&response.body)?)
    }
}

impl std::fmt::Debug for CartStateFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStateFetcher")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

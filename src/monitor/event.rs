//! Cart snapshot and update event types.
//!
//! These types are serializable so they can travel as a custom event's detail
//! and be read back by any consumer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::host::CustomEvent;

/// Cart state as returned by the cart-state endpoint.
///
/// Opaque: only `items` is ever inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartSnapshot(serde_json::Value);

impl CartSnapshot {
    /// Wrap a JSON value.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Parse a response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body).map(Self)
    }

    /// The `items` array, if present.
    #[must_use]
    pub fn items(&self) -> Option<&Vec<serde_json::Value>> {
        self.0.get("items").and_then(serde_json::Value::as_array)
    }

    /// Number of line items; zero when `items` is missing.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items().map_or(0, Vec::len)
    }

    /// Whether the cart has at least one line item.
    #[must_use]
    pub fn has_items(&self) -> bool {
        self.item_count() > 0
    }

    /// The raw JSON value.
    #[must_use]
    pub const fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Unwrap into the raw JSON value.
    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Mechanism that noticed a cart mutation.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateSource {
    Xhr,
    Fetch,
    Observer,
    PageLoad,
}

impl UpdateSource {
    /// Wire name of the source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Xhr => "xhr",
            Self::Fetch => "fetch",
            Self::Observer => "observer",
            Self::PageLoad => "pageLoad",
        }
    }
}

impl std::fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detail payload of a `tinker:cart-update` event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartUpdateEvent {
    pub cart: CartSnapshot,
    pub timestamp: String,
    pub source: UpdateSource,
}

impl CartUpdateEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(cart: CartSnapshot, source: UpdateSource) -> Self {
        Self::at(cart, source, Utc::now())
    }

    /// Build an event stamped with `at`.
    #[must_use]
    pub fn at(cart: CartSnapshot, source: UpdateSource, at: DateTime<Utc>) -> Self {
        Self {
            cart,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            source,
        }
    }

    /// Read the detail of a dispatched event back.
    ///
    /// Returns `None` for events whose detail is not a cart update.
    #[must_use]
    pub fn from_event(event: &CustomEvent) -> Option<Self> {
        event.detail_as().ok()
    }
}

/// A detection reported by a strategy to the coalescer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Detection {
    pub source: UpdateSource,
    /// Intercepted response body, when the strategy saw one.
    pub body: Option<Vec<u8>>,
}

impl Detection {
    pub(crate) fn intercepted(source: UpdateSource, body: Vec<u8>) -> Self {
        Self {
            source,
            body: Some(body),
        }
    }

    pub(crate) const fn observed() -> Self {
        Self {
            source: UpdateSource::Observer,
            body: None,
        }
    }
}

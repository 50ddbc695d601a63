//! # cartwatch - Cart Activity Monitor
//!
//! cartwatch detects when a storefront page mutates its shopping cart and
//! broadcasts the new cart contents as a `tinker:cart-update` event on the
//! page's document. Downstream integrations subscribe to that one event
//! instead of each hooking the page's network layer themselves.
//!
//! ## Core Concepts
//!
//! - **PageHost**: The page environment: origin, request primitives, frame
//!   scheduler, optional resource timeline, and document
//! - **Detection strategy**: `Active` decorates the fetch and xhr primitives;
//!   `Passive` watches resource-timing entries
//! - **Coalescing**: Any number of detections in one frame produce at most one
//!   cart read and one event
//! - **MonitorHandle**: Running monitor; `disconnect` (or drop) stops it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cartwatch::{initialize_cart_monitor, CartUpdateEvent, MonitorConfig, PageHost};
//!
//! let host = PageHost::new(origin, network, frames, document.clone());
//! let handle = initialize_cart_monitor(&host, MonitorConfig::default())?;
//!
//! let updates = document.subscribe(cartwatch::CART_UPDATE_EVENT);
//! let event = updates.recv()?;
//! let update = CartUpdateEvent::from_event(&event).expect("cart update");
//! println!("{} items via {}", update.cart.item_count(), update.source);
//!
//! handle.disconnect();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod host;
pub mod monitor;

// Re-export primary types at crate root for convenience
pub use config::{
    DetectionStrategy, MonitorConfig, CART_UPDATE_EVENT, DEFAULT_CART_ENDPOINTS,
    DEFAULT_CART_STATE_ENDPOINT,
};
pub use error::{ConfigError, MonitorError, MonitorResult, NetworkError};
pub use host::{
    CustomEvent, Document, EventStream, FetchPrimitive, FrameScheduler, IntervalFrames,
    ManualFrames, NetworkPrimitives, PageHost, PerformanceEntry, PerformanceTimeline,
    ResourceTimeline, XhrPrimitive,
};
pub use monitor::{
    initialize_cart_monitor, CartSnapshot, CartUpdateEvent, Detector, EndpointMatcher,
    MonitorHandle, UpdateSource,
};

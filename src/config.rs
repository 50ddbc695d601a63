//! Monitor configuration.
//!
//! A `MonitorConfig` is built once (usually deserialized from the storefront
//! theme settings) and is immutable once handed to `initialize_cart_monitor`.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MonitorResult};

/// Name of the bubbling custom event broadcast on every cart update.
pub const CART_UPDATE_EVENT: &str = "tinker:cart-update";

/// Canonical read endpoint returning the current cart.
pub const DEFAULT_CART_STATE_ENDPOINT: &str = "/cart.js";

/// Path suffixes of the cart-mutating storefront endpoints.
///
/// Both the content-negotiated (`.js`) and plain forms are listed.
pub const DEFAULT_CART_ENDPOINTS: [&str; 8] = [
    "/cart/add.js",
    "/cart/add",
    "/cart/update.js",
    "/cart/update",
    "/cart/change.js",
    "/cart/change",
    "/cart/clear.js",
    "/cart/clear",
];

/// How cart mutations are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStrategy {
    /// Decorate the fetch and xhr primitives and read cart responses directly.
    #[default]
    Active,
    /// Watch resource-timing entries and refetch the cart on a hit.
    Passive,
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Enables diagnostic logging of matches and dispatches.
    pub debug: bool,
    /// Ordered path suffixes identifying cart-mutating requests.
    pub cart_endpoints: Vec<String>,
    /// Detection strategy.
    pub strategy: DetectionStrategy,
    /// Read endpoint used to fetch the canonical cart state.
    pub cart_state_endpoint: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debug: false,
            cart_endpoints: DEFAULT_CART_ENDPOINTS.iter().map(|s| (*s).to_string()).collect(),
            strategy: DetectionStrategy::default(),
            cart_state_endpoint: DEFAULT_CART_STATE_ENDPOINT.to_string(),
        }
    }
}

impl MonitorConfig {
    /// Parse a configuration document. Missing keys take their defaults.
    pub fn from_json(json: &str) -> MonitorResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Malformed {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Toggle debug logging.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Select the detection strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: DetectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replace the cart endpoint suffixes.
    #[must_use]
    pub fn with_cart_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cart_endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the canonical cart-state endpoint.
    #[must_use]
    pub fn with_cart_state_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.cart_state_endpoint = endpoint.into();
        self
    }

    /// Check the configuration for values that would make the monitor match
    /// everything or fetch nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cart_endpoints.is_empty() {
            return Err(ConfigError::MissingField {
                field: "cartEndpoints".to_string(),
            });
        }

        // An empty suffix would match every path.
        if let Some(index) = self.cart_endpoints.iter().position(|s| s.trim().is_empty()) {
            return Err(ConfigError::BlankEndpoint { index });
        }

        if self.cart_state_endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "cartStateEndpoint".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_mutation_paths() {
        let cfg = MonitorConfig::default();
        assert!(!cfg.debug);
        assert_eq!(cfg.strategy, DetectionStrategy::Active);
        assert_eq!(cfg.cart_endpoints.len(), 8);
        assert_eq!(cfg.cart_endpoints[0], "/cart/add.js");
        assert_eq!(cfg.cart_state_endpoint, "/cart.js");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn from_json_fills_missing_keys() {
        let cfg = MonitorConfig::from_json(r#"{"debug": true, "strategy": "passive"}"#).unwrap();
        assert!(cfg.debug);
        assert_eq!(cfg.strategy, DetectionStrategy::Passive);
        assert_eq!(cfg.cart_endpoints, MonitorConfig::default().cart_endpoints);
    }

    #[test]
    fn from_json_reads_camel_case_endpoints() {
        let cfg = MonitorConfig::from_json(
            r#"{"cartEndpoints": ["/cart/add.js"], "cartStateEndpoint": "/api/cart"}"#,
        )
        .unwrap();
        assert_eq!(cfg.cart_endpoints, vec!["/cart/add.js".to_string()]);
        assert_eq!(cfg.cart_state_endpoint, "/api/cart");
    }

    #[test]
    fn from_json_rejects_unknown_strategy() {
        let err = MonitorConfig::from_json(r#"{"strategy": "psychic"}"#).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn validate_rejects_blank_suffix() {
        let cfg = MonitorConfig::default().with_cart_endpoints(["/cart/add.js", "  "]);
        assert_eq!(cfg.validate(), Err(ConfigError::BlankEndpoint { index: 1 }));
    }

    #[test]
    fn validate_rejects_empty_endpoint_list() {
        let cfg = MonitorConfig::default().with_cart_endpoints(Vec::<String>::new());
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn validate_rejects_blank_cart_state_endpoint() {
        let cfg = MonitorConfig::default().with_cart_state_endpoint("");
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn strategy_serializes_lowercase() {
        let s = serde_json::to_string(&DetectionStrategy::Passive).unwrap();
        assert_eq!(s, "\"passive\"");
    }
}

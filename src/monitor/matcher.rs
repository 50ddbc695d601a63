//! Endpoint matching.
//!
//! A URL is a cart endpoint when its path, resolved against the page origin,
//! ends with one of the configured suffixes. Suffix matching keeps localized
//! (`/fr/cart/add.js`) and versioned storefront paths working. Query strings
//! and fragments never take part in the decision.

use url::Url;

/// Classifies request URLs as cart-mutating or not.
#[derive(Debug, Clone)]
pub struct EndpointMatcher {
    origin: Url,
    suffixes: Vec<String>,
}

impl EndpointMatcher {
    /// Matcher resolving against `origin` with the given ordered suffixes.
    #[must_use]
    pub fn new<I, S>(origin: Url, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origin,
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    /// True if `url` targets a cart-mutating endpoint.
    ///
    /// Malformed URLs are not cart endpoints.
    #[must_use]
    pub fn is_cart_endpoint(&self, url: &str) -> bool {
        self.matching_suffix(url).is_some()
    }

    /// The first configured suffix that `url`'s path ends with.
    #[must_use]
    pub fn matching_suffix(&self, url: &str) -> Option<&str> {
        let resolved = self.origin.join(url).ok()?;
        let path = resolved.path();
        self.suffixes
            .iter()
            .find(|suffix| path.ends_with(suffix.as_str()))
            .map(String::as_str)
    }

    /// Configured suffixes, in order.
    #[must_use]
    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Origin relative URLs are resolved against.
    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }
}

//! Conditional GET support.
//!
//! Responses derived from a dataset carry its checksum as ETag. Clients are
//! told to always revalidate, so a repeated request costs one metadata lookup
//! and an empty 304.

use axum::http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue};
use tracing::warn;

/// Cache directive attached to every validated response
pub const CACHE_CONTROL_VALUE: &str = "max-age=0";

/// Outcome of validating a request against the current checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// The client copy is current: 304 without a body
    NotModified,
    /// Send the full response with these validators
    Fresh { etag: String },
}

/// Compares conditional request headers with a dataset checksum
#[derive(Debug, Clone)]
pub struct CacheValidator {
    etag: String,
}

impl CacheValidator {
    pub fn new(checksum: impl Into<String>) -> Self {
        Self {
            etag: checksum.into(),
        }
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Decide from the request's `If-None-Match` header.
    pub fn check(&self, request_headers: &HeaderMap) -> CacheDecision {
        let matched = request_headers
            .get_all(IF_NONE_MATCH)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|candidate| self.matches(candidate));

        if matched {
            CacheDecision::NotModified
        } else {
            CacheDecision::Fresh {
                etag: self.etag.clone(),
            }
        }
    }

    /// `*`, the bare checksum, its quoted form and weak validators all match.
    fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        let candidate = candidate
            .strip_prefix('"')
            .and_then(|c| c.strip_suffix('"'))
            .unwrap_or(candidate);
        !candidate.is_empty() && candidate == self.etag
    }

    /// Headers sent with both 200 and 304 responses.
    pub fn response_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&self.etag) {
            Ok(etag) => {
                headers.insert(ETAG, etag);
            }
            Err(err) => {
                warn!(checksum = ?self.etag, error = %err, "cache.etag_skipped");
            }
        }
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE));
        headers
    }
}

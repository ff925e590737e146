//! Utility functions and helpers.

pub mod http;
pub mod log;

use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

/// Bucket key used for locators that carry no host.
pub const FALLBACK_DOMAIN: &str = "_unknown";

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Extract the domain from a URL string.
pub fn get_domain(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_lowercase()))
}

/// Rate-limiter key for a locator.
pub fn domain_key(locator: &str) -> String {
    get_domain(locator).unwrap_or_else(|| FALLBACK_DOMAIN.to_string())
}

/// Normalize an identity string for exact matching.
///
/// Lowercases and keeps only Unicode words, joined by single spaces.
pub fn normalize_identity(raw: &str) -> String {
    raw.unicode_words()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 fingerprint of the given parts, hex encoded.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

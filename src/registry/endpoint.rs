//! Endpoint normalization for duplicate detection.
//!
//! Push services sometimes hand out the same endpoint with varying query
//! strings or a trailing slash. Two endpoints are considered the same device
//! when their normalized forms match.

use url::Url;

/// Canonical comparison form of a push endpoint.
///
/// Drops query string and fragment, lowercases scheme and host, and strips a
/// trailing slash. Unparseable input is trimmed and cut at `?`/`#` instead.
#[must_use]
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            let rendered = url.to_string();
            rendered.trim_end_matches('/').to_owned()
        }
        Err(_) => {
            let cut = trimmed
                .find(['?', '#'])
                .map_or(trimmed, |idx| &trimmed[..idx]);
            cut.trim_end_matches('/').to_owned()
        }
    }
}

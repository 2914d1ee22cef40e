//! Rate limit header parsing.
//!
//! Discord reports the authoritative bucket state on every response via
//! `X-RateLimit-*` headers; 429 responses additionally carry `Retry-After`.

use http::HeaderMap;

/// Parsed rate limit information from response headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Maximum requests allowed in the bucket's window.
    pub limit: Option<u32>,

    /// Remaining requests in the current window.
    pub remaining: Option<u32>,

    /// Seconds until the bucket resets (fractional).
    pub reset_after: Option<f64>,

    /// `Retry-After` value in seconds, present on 429 responses.
    pub retry_after: Option<f64>,
}

impl RateLimitHeaders {
    /// Parse rate limit headers from a response header map.
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            limit: parse_header(headers, "x-ratelimit-limit"),
            remaining: parse_header(headers, "x-ratelimit-remaining"),
            reset_after: parse_header(headers, "x-ratelimit-reset-after"),
            retry_after: parse_header(headers, "retry-after"),
        }
    }

    /// Whether the response carried any bucket state at all.
    ///
    /// Non-Discord responses (CDN errors, edge throttling) omit these headers.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset_after.is_none()
    }
}

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn header_map(entries: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn parses_discord_bucket_headers() {
        let headers = header_map(&[
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "3"),
            ("x-ratelimit-reset-after", "2.5"),
        ]);

        let parsed = RateLimitHeaders::parse(&headers);
        assert_eq!(parsed.limit, Some(5));
        assert_eq!(parsed.remaining, Some(3));
        assert_eq!(parsed.reset_after, Some(2.5));
        assert!(!parsed.is_empty());
    }

    #[test]
    fn missing_headers_yield_empty() {
        let parsed = RateLimitHeaders::parse(&HeaderMap::new());
        assert!(parsed.is_empty());
        assert_eq!(parsed.retry_after, None);
    }

    #[test]
    fn garbage_values_are_ignored() {
        let headers = header_map(&[("x-ratelimit-remaining", "not-a-number")]);
        assert_eq!(RateLimitHeaders::parse(&headers).remaining, None);
    }
}

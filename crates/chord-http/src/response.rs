//! HTTP response envelope.

use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;

use chord_ratelimit::RateLimitHeaders;

/// How the response body should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResMethod {
    /// Decode as UTF-8 text.
    Text,
    /// Keep the raw bytes (e.g. asset downloads).
    Read,
    /// Parse as JSON.
    #[default]
    Json,
}

/// Decoded response body.
///
/// The variant normally follows the requested [`ResMethod`], but a JSON
/// request whose body fails to parse degrades to `Text` rather than erroring,
/// since non-JSON bodies show up on edge-level failures.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl ResponseBody {
    /// Structured body, if the response decoded as JSON.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Textual body, if the response decoded as text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Raw bytes, if the response was read unparsed.
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// One completed HTTP exchange. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,

    /// Reason phrase, when known.
    pub reason: Option<String>,

    /// Response headers.
    pub headers: HeaderMap,

    /// Decoded body.
    pub body: ResponseBody,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status <= 299
    }

    /// Rate-limit state reported by this response.
    #[must_use]
    pub fn ratelimit_headers(&self) -> RateLimitHeaders {
        RateLimitHeaders::parse(&self.headers)
    }
}

//! Error taxonomy for the HTTP engine.
//!
//! Every non-2xx outcome the retry loop does not absorb maps to one typed
//! variant carrying the original status, reason, and best-effort decoded
//! message for diagnostics. 400 responses are further split by Discord's
//! application error code via a lookup table, extensible without touching
//! the engine's control flow.

use std::fmt;

use thiserror::Error;

use crate::response::{HttpResponse, ResponseBody};
use crate::transport::TransportError;

/// Diagnostic payload extracted from a failed response.
#[derive(Debug, Clone)]
pub struct ErrorBody {
    /// HTTP status.
    pub status: u16,

    /// Reason phrase, when known.
    pub reason: Option<String>,

    /// Discord application error code, 0 when absent.
    pub code: u64,

    /// Human-readable message, falling back to the raw body.
    pub message: String,

    /// Structured sub-errors, when the body carried them.
    pub errors: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Extract diagnostics from a response, tolerating non-JSON bodies.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        let (code, message, errors) = match &response.body {
            ResponseBody::Json(value) => (
                value.get("code").and_then(serde_json::Value::as_u64).unwrap_or(0),
                value
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| value.to_string(), ToOwned::to_owned),
                value.get("errors").cloned(),
            ),
            ResponseBody::Text(text) => (0, text.clone(), None),
            ResponseBody::Bytes(bytes) => (0, format!("{} bytes", bytes.len()), None),
        };

        Self {
            status: response.status,
            reason: response.reason.clone(),
            code,
            message,
            errors,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HTTP {} {} (code: {})",
            self.status,
            self.reason.as_deref().unwrap_or("?"),
            self.code
        )?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(errors) = &self.errors {
            write!(f, " {errors}")?;
        }
        Ok(())
    }
}

/// Typed failure raised to the caller by [`crate::DiscordApi::query`].
#[derive(Debug, Error)]
pub enum HttpError {
    /// The resource was not found (404).
    #[error("not found: {0}")]
    NotFound(ErrorBody),

    /// The bot is not allowed to do this (403).
    #[error("forbidden: {0}")]
    Forbidden(ErrorBody),

    /// The request was blocked by Discord's automod (400 with a known code).
    #[error("blocked by automod: {0}")]
    AutomodBlock(ErrorBody),

    /// Rate limited without a parseable body, e.g. edge/CDN throttling
    /// rather than Discord's own limiter.
    #[error("rate limited: {0}")]
    Ratelimited(ErrorBody),

    /// Persistent 5xx (or caller-specified retry code) after exhausting
    /// the retry budget.
    #[error("Discord server error: {0}")]
    ServerError(ErrorBody),

    /// Any other non-2xx status.
    #[error("{0}")]
    Response(ErrorBody),

    /// Connection-level failure that outlived the retry budget.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A body that was required to be JSON could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configured value (token, audit reason) is not a valid header value.
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),

    /// The retry loop fell through without returning or raising. Marks a
    /// broken invariant in the engine, not a reachable business path.
    #[error("request engine exhausted its retry budget without a verdict")]
    RetriesExhausted,
}

impl HttpError {
    /// Status code carried by response-shaped errors.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound(b)
            | Self::Forbidden(b)
            | Self::AutomodBlock(b)
            | Self::Ratelimited(b)
            | Self::ServerError(b)
            | Self::Response(b) => Some(b.status),
            _ => None,
        }
    }
}

/// Error kinds a 400 application code can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BadRequestKind {
    AutomodBlock,
}

/// Application error codes with a distinguished error kind.
const HTTP_400_ERROR_TABLE: &[(u64, BadRequestKind)] = &[
    (200_000, BadRequestKind::AutomodBlock),
    (200_001, BadRequestKind::AutomodBlock),
];

/// Map a 400 response to its error variant via the code table.
#[must_use]
pub fn classify_bad_request(response: &HttpResponse) -> HttpError {
    let body = ErrorBody::from_response(response);
    let kind = HTTP_400_ERROR_TABLE
        .iter()
        .find(|(code, _)| *code == body.code)
        .map(|(_, kind)| *kind);

    match kind {
        Some(BadRequestKind::AutomodBlock) => HttpError::AutomodBlock(body),
        None => HttpError::Response(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
        HttpResponse {
            status,
            reason: Some("Bad Request".into()),
            headers: HeaderMap::new(),
            body: ResponseBody::Json(body),
        }
    }

    #[test]
    fn automod_codes_map_to_distinguished_kind() {
        for code in [200_000u64, 200_001] {
            let response = json_response(400, serde_json::json!({"code": code, "message": "blocked"}));
            assert!(matches!(classify_bad_request(&response), HttpError::AutomodBlock(_)));
        }
    }

    #[test]
    fn unknown_400_codes_stay_generic() {
        let response = json_response(400, serde_json::json!({"code": 50035, "message": "Invalid Form Body"}));
        assert!(matches!(classify_bad_request(&response), HttpError::Response(_)));
    }

    #[test]
    fn error_body_tolerates_text_bodies() {
        let response = HttpResponse {
            status: 400,
            reason: None,
            headers: HeaderMap::new(),
            body: ResponseBody::Text("<html>edge error</html>".into()),
        };
        let body = ErrorBody::from_response(&response);
        assert_eq!(body.code, 0);
        assert_eq!(body.message, "<html>edge error</html>");
    }

    #[test]
    fn error_display_includes_diagnostics() {
        let response = json_response(
            400,
            serde_json::json!({"code": 50035, "message": "Invalid Form Body", "errors": {"content": []}}),
        );
        let text = ErrorBody::from_response(&response).to_string();
        assert!(text.contains("HTTP 400"));
        assert!(text.contains("50035"));
        assert!(text.contains("Invalid Form Body"));
    }
}

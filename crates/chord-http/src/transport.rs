//! HTTP transport seam.
//!
//! [`Transport`] is the thin session layer below the request engine: it
//! performs one network call and decodes the body per the requested method.
//! Retry policy, bucket gating, and error classification all live above it,
//! which keeps the seam small enough to mock in engine tests.

use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, Method};
use serde_json::Value;
use thiserror::Error;

use crate::response::{HttpResponse, ResMethod, ResponseBody};

/// Transport-level failure, before any HTTP status exists.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying client failed to build or send the request.
    #[error("transport error: {0}")]
    Request(#[from] reqwest::Error),
}

impl TransportError {
    /// Whether this failure is connection-level and worth retrying
    /// (timeouts, refused connections, resets mid-exchange).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect() || reset_in_chain(e),
        }
    }
}

/// Resets arrive wrapped in hyper/reqwest layers; the IO error carrying
/// the kind sits somewhere down the source chain.
fn reset_in_chain(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            );
        }
        source = cause.source();
    }
    false
}

/// Performs one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `method` to `url` with the given headers and optional JSON body,
    /// decoding the response body per `res_method`.
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
        res_method: ResMethod,
    ) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with connection pooling and the given timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
        res_method: ResMethod,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.client.request(method, url).headers(headers.clone());
        if let Some(json) = body {
            request = request.json(json);
        }

        let response = request.send().await?;

        let status = response.status();
        let reason = status.canonical_reason().map(ToOwned::to_owned);
        let response_headers = response.headers().clone();

        let body = match res_method {
            ResMethod::Read => ResponseBody::Bytes(response.bytes().await?),
            ResMethod::Text => ResponseBody::Text(response.text().await?),
            ResMethod::Json => {
                // Non-JSON bodies (edge throttling, HTML error pages) degrade
                // to text instead of failing the whole exchange.
                let text = response.text().await?;
                match serde_json::from_str(&text) {
                    Ok(value) => ResponseBody::Json(value),
                    Err(_) => ResponseBody::Text(text),
                }
            }
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            reason,
            headers: response_headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::io::{Error as IoError, ErrorKind};

    use super::*;

    /// Stand-in for the hyper/reqwest layers above the IO error.
    #[derive(Debug)]
    struct Layered(IoError);

    impl fmt::Display for Layered {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "request failed")
        }
    }

    impl std::error::Error for Layered {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn reset_is_found_through_wrapping_layers() {
        let err = Layered(IoError::new(ErrorKind::ConnectionReset, "reset by peer"));
        assert!(reset_in_chain(&err));

        let err = Layered(IoError::new(ErrorKind::BrokenPipe, "broken pipe"));
        assert!(reset_in_chain(&err));
    }

    #[test]
    fn other_io_failures_stay_terminal() {
        let err = Layered(IoError::new(ErrorKind::PermissionDenied, "denied"));
        assert!(!reset_in_chain(&err));

        let err = IoError::new(ErrorKind::ConnectionReset, "bare, no chain");
        // Only sources are inspected; the top-level error is reqwest's own.
        assert!(!reset_in_chain(&err));
    }
}

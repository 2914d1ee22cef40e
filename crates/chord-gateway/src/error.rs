//! Gateway-specific error types.

use thiserror::Error;

/// Errors raised by shard connections and the fleet launcher.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// WebSocket failure (connect, send, or receive).
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A gateway frame could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The REST side failed (shard-count negotiation, token check).
    #[error("HTTP error: {0}")]
    Http(#[from] chord_http::HttpError),

    /// The gateway broke protocol during the handshake.
    #[error("handshake error: {0}")]
    Handshake(String),
}

//! chord-http - rate-limit-aware Discord HTTP request engine
//!
//! The single entry point the rest of the library depends on is
//! [`DiscordApi::query`]: it applies default headers, resolves the request's
//! rate-limit bucket, performs the call under that bucket's token gate, and
//! classifies failures into retryable and terminal kinds.
//!
//! - Transient conditions (429 with a structured body, 5xx, caller-opted
//!   retry codes, connection-level errors) are retried locally and never
//!   surface unless the retry budget is exhausted.
//! - Everything else maps to a typed [`HttpError`] carrying the original
//!   status, reason, and decoded message for diagnostics.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod api;
mod config;
mod error;
mod response;
mod transport;

pub use api::{CurrentApplication, DiscordApi, GatewayBot, RequestOptions, SessionStartLimit};
pub use config::ApiConfig;
pub use error::{ErrorBody, HttpError};
pub use response::{HttpResponse, ResMethod, ResponseBody};
pub use transport::{ReqwestTransport, Transport, TransportError};

/// Result type for HTTP engine operations.
pub type HttpResult<T> = Result<T, HttpError>;

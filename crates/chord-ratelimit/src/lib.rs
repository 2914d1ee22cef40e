//! chord-ratelimit - Discord rate-limit primitives for the chord library
//!
//! This crate provides the pieces the HTTP request engine needs to stay
//! inside Discord's per-route quotas:
//!
//! - **Bucket Keys**: normalize a method + path into the bucket key Discord
//!   actually rate-limits on
//! - **Token Buckets**: per-bucket counters corrected from response headers
//! - **Bucket Map**: lazy bucket storage with inactivity cleanup
//! - **Header Parsing**: `X-RateLimit-*` and `Retry-After` extraction
//! - **Backoff**: the retry cadence used for 5xx and custom retry codes
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chord_ratelimit::{bucket_key, BucketMap};
//!
//! let buckets = BucketMap::new();
//! let bucket = buckets.get(&bucket_key("GET", "/channels/123/messages/456"));
//!
//! bucket.acquire().await;
//! // ... perform the request ...
//! bucket.update(&headers);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod backoff;
mod bucket;
mod bucket_key;
mod headers;
mod store;

pub use backoff::*;
pub use bucket::*;
pub use bucket_key::*;
pub use headers::*;
pub use store::*;

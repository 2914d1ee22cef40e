//! Per-bucket token accounting.
//!
//! Each [`Ratelimit`] tracks the local view of one Discord bucket's quota.
//! The view is a guess until the first response arrives; after that,
//! [`Ratelimit::update`] makes the response headers authoritative, so the
//! bucket self-heals even when multiple bot instances share a quota.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::debug;

use crate::RateLimitHeaders;

/// How long a bucket must sit unused before the cleanup sweep may drop it.
pub const INACTIVITY_WINDOW: Duration = Duration::from_secs(300);

/// Wait applied when a bucket is exhausted but has no known reset time.
const FALLBACK_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct BucketState {
    limit: u32,
    remaining: u32,
    reset_after: f64,
    expires: Option<Instant>,
    last_request: Instant,
}

/// Local token bucket for one rate-limit bucket key.
///
/// Starts with a quota of exactly one free call; every completed request
/// corrects the state from response headers. The internal lock is held only
/// for the token check/decrement, never across a sleep or a network call, so
/// waiting on one bucket does not serialize traffic to other buckets.
#[derive(Debug)]
pub struct Ratelimit {
    key: String,
    state: Mutex<BucketState>,
}

impl Ratelimit {
    /// Create a fresh bucket for `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(BucketState {
                limit: 1,
                remaining: 1,
                reset_after: 0.0,
                expires: None,
                last_request: Instant::now(),
            }),
        }
    }

    /// The bucket key this state belongs to.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Block until a token is available, then consume it.
    ///
    /// A bucket whose reset time has passed is treated as freshly refilled.
    /// When no tokens are left, the caller sleeps until the known reset (or a
    /// one second fallback) and retries.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                state.last_request = Instant::now();

                if state.expires.is_some_and(|e| Instant::now() >= e) {
                    state.remaining = state.limit;
                    state.expires = None;
                    state.reset_after = 0.0;
                }

                if state.remaining > 0 {
                    state.remaining -= 1;
                    return;
                }

                state
                    .expires
                    .map_or(FALLBACK_WAIT, |e| e.saturating_duration_since(Instant::now()))
            };

            debug!(key = %self.key, wait_ms = wait.as_millis() as u64, "bucket exhausted, waiting");
            sleep(wait).await;
        }
    }

    /// Correct the bucket from response headers.
    ///
    /// Header values are authoritative over the local guess. Responses
    /// without rate-limit headers conservatively zero the bucket with an
    /// immediate expiry, so the next acquire refills it.
    pub fn update(&self, headers: &RateLimitHeaders) {
        let mut state = self.state.lock();

        if let Some(limit) = headers.limit {
            state.limit = limit;
        }
        state.remaining = headers.remaining.unwrap_or(0);
        state.reset_after = headers.reset_after.unwrap_or(0.0);
        state.expires = Some(Instant::now() + Duration::from_secs_f64(state.reset_after));
    }

    /// Whether the bucket has sat unused long enough to be swept.
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        self.state.lock().last_request.elapsed() >= INACTIVITY_WINDOW
    }

    /// Remaining tokens in the local view.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.state.lock().remaining
    }
}

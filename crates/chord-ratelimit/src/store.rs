//! Bucket storage with inactivity cleanup.
//!
//! One [`BucketMap`] is owned by the HTTP client instance and shared by all
//! request call sites. Buckets are created lazily on first use and never
//! explicitly destroyed; a sweep drops inactive ones once the total count
//! passes a threshold, bounding memory for long-running processes that touch
//! many distinct routes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::bucket::{Ratelimit, INACTIVITY_WINDOW};

/// Bucket count above which the inactivity sweep kicks in.
const SWEEP_THRESHOLD: usize = 256;

/// Lazily-populated map of bucket key to rate-limit state.
#[derive(Debug, Default)]
pub struct BucketMap {
    buckets: Mutex<HashMap<String, Arc<Ratelimit>>>,
}

impl BucketMap {
    /// Create an empty bucket map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the bucket for `key`, creating it on first use.
    ///
    /// Insertion of a new key triggers the cleanup sweep when the map has
    /// grown past the threshold.
    #[must_use]
    pub fn get(&self, key: &str) -> Arc<Ratelimit> {
        let mut buckets = self.buckets.lock();

        if let Some(bucket) = buckets.get(key) {
            return Arc::clone(bucket);
        }

        let bucket = Arc::new(Ratelimit::new(key));
        buckets.insert(key.to_owned(), Arc::clone(&bucket));
        Self::sweep_locked(&mut buckets);
        bucket
    }

    /// Drop inactive buckets if the map has outgrown the threshold.
    ///
    /// A bucket used within the inactivity window is never removed.
    pub fn sweep(&self) {
        Self::sweep_locked(&mut self.buckets.lock());
    }

    fn sweep_locked(buckets: &mut HashMap<String, Arc<Ratelimit>>) {
        if buckets.len() <= SWEEP_THRESHOLD {
            return;
        }

        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_inactive());
        debug!(before, after = buckets.len(), "swept inactive rate-limit buckets");
    }

    /// Number of live buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Whether the map holds no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    /// Run the periodic cleanup sweep until the returned task is aborted.
    ///
    /// The sweep runs on the same cadence as the inactivity window.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let map = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval());
            tick.tick().await; // first tick fires immediately
            loop {
                tick.tick().await;
                map.sweep();
            }
        })
    }
}

const fn sweep_interval() -> Duration {
    INACTIVITY_WINDOW
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_idempotent_per_key() {
        let map = BucketMap::new();
        let a = map.get("GET /channels/:id");
        let b = map.get("GET /channels/:id");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn sweep_keeps_recently_used_buckets() {
        let map = BucketMap::new();
        for i in 0..300 {
            let _ = map.get(&format!("GET /channels/{i}"));
        }

        // All 300 buckets were just used; the sweep must not remove any.
        map.sweep();
        assert_eq!(map.len(), 300);
    }

    #[test]
    fn sweep_is_a_noop_below_threshold() {
        let map = BucketMap::new();
        for i in 0..10 {
            let _ = map.get(&format!("GET /guilds/{i}"));
        }
        map.sweep();
        assert_eq!(map.len(), 10);
    }
}

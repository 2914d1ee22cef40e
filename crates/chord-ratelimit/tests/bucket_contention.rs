//! Contention behavior across and within buckets.
//!
//! Validates the concurrency contract of the bucket map:
//! - acquisitions on one key respect that key's token ceiling
//! - waiting on an exhausted key does not stall other keys
//! - the cleanup sweep never drops a bucket that is actively in use

use std::sync::Arc;
use std::time::{Duration, Instant};

use chord_ratelimit::{bucket_key, BucketMap, RateLimitHeaders};

fn headers(limit: u32, remaining: u32, reset_after: f64) -> RateLimitHeaders {
    RateLimitHeaders {
        limit: Some(limit),
        remaining: Some(remaining),
        reset_after: Some(reset_after),
        retry_after: None,
    }
}

#[tokio::test]
async fn exhausted_key_does_not_block_other_keys() {
    let map = Arc::new(BucketMap::new());

    let blocked = map.get("POST /channels/1/messages");
    blocked.update(&headers(1, 0, 5.0));

    let free = map.get("GET /guilds/2");
    free.update(&headers(10, 10, 5.0));

    // The free bucket must grant immediately even while another task is
    // parked on the exhausted one.
    let parked = {
        let blocked = Arc::clone(&blocked);
        tokio::spawn(async move { blocked.acquire().await })
    };

    let start = Instant::now();
    free.acquire().await;
    assert!(start.elapsed() < Duration::from_millis(100));

    parked.abort();
}

#[tokio::test]
async fn concurrent_acquires_respect_the_ceiling() {
    let map = Arc::new(BucketMap::new());
    let bucket = map.get("PATCH /guilds/1/members/:id");
    bucket.update(&headers(5, 5, 30.0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let bucket = Arc::clone(&bucket);
        tasks.push(tokio::spawn(async move {
            tokio::time::timeout(Duration::from_millis(200), bucket.acquire())
                .await
                .is_ok()
        }));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap() {
            granted += 1;
        }
    }

    // Exactly the five available tokens are granted within the window.
    assert_eq!(granted, 5);
}

#[tokio::test]
async fn resolver_and_map_share_buckets_across_resource_ids() {
    let map = BucketMap::new();

    let a = map.get(&bucket_key("GET", "/channels/7/messages/100"));
    let b = map.get(&bucket_key("GET", "/channels/7/messages/200"));
    assert!(Arc::ptr_eq(&a, &b));

    // Deleting a message lives in a separate bucket.
    let del = map.get(&bucket_key("DELETE", "/channels/7/messages/100"));
    assert!(!Arc::ptr_eq(&a, &del));
}

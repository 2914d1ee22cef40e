//! Retry backoff for the HTTP request engine.

use std::time::Duration;

use rand::Rng;

/// Delay before retry attempt `attempt` (zero-based).
///
/// Grows linearly with a random jitter on top: `1 + 2 * attempt + jitter`
/// seconds, with jitter uniform in `[0, 1)`. Used for 5xx responses and
/// caller-supplied retry codes; 429 responses use the server-provided
/// `retry_after` instead.
#[must_use]
pub fn retry_delay(attempt: u32) -> Duration {
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    Duration::from_secs_f64(1.0 + f64::from(attempt) * 2.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempts() {
        for attempt in 0..5 {
            let d = retry_delay(attempt).as_secs_f64();
            let base = 1.0 + f64::from(attempt) * 2.0;
            assert!(d >= base, "attempt {attempt}: {d} < {base}");
            assert!(d < base + 1.0, "attempt {attempt}: {d} >= {}", base + 1.0);
        }
    }
}

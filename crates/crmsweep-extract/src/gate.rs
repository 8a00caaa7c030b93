//! Shared token-bucket gate in front of the search API.
//!
//! Every probe and page fetch, from every leaf worker, takes one token before
//! it goes out. This is the only state the workers share.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateGate {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

impl RateGate {
    /// `rate_per_sec` tokens are added per second, up to `burst` banked tokens.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: rate_per_sec.max(0.001),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
                bucket.last = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_immediate() {
        let gate = RateGate::new(1.0, 5);
        let start = Instant::now();
        for _ in 0..5 {
            gate.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn waits_for_refill_once_drained() {
        let gate = RateGate::new(50.0, 1);
        gate.acquire().await;
        let start = Instant::now();
        gate.acquire().await;
        // One token at 50/s takes ~20ms to refill.
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}

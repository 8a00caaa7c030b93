use std::time::Duration;

use chrono::TimeDelta;

use crate::{ExtractError, RetryPolicy};

/// Hard cap on `total` the search API will page through for one query.
pub const SEARCH_CEILING: u64 = 10_000;
pub const MAX_SPLIT_DEPTH: u32 = 8;
pub const MIN_WINDOW_DAYS: i64 = 7;
/// Largest page the search API serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Tunables for one [`ExtractionEngine`](crate::ExtractionEngine).
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub ceiling: u64,
    pub max_depth: u32,
    pub min_window: TimeDelta,
    pub page_size: u32,
    /// Leaf workers running concurrently.
    pub workers: usize,
    /// Per network call; exceeding it counts as a transient failure.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    /// Token-bucket refill rate shared by every worker.
    pub rate_per_sec: f64,
    pub burst: u32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            ceiling: SEARCH_CEILING,
            max_depth: MAX_SPLIT_DEPTH,
            min_window: TimeDelta::days(MIN_WINDOW_DAYS),
            page_size: MAX_PAGE_SIZE,
            workers: 4,
            call_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            rate_per_sec: 4.0,
            burst: 4,
        }
    }
}

impl ExtractConfig {
    pub fn validate(&self) -> Result<(), ExtractError> {
        let fail = |msg: &str| -> Result<(), ExtractError> {
            Err(ExtractError::InvalidConfig(msg.to_string()))
        };
        if self.ceiling == 0 {
            return fail("ceiling must be positive");
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return fail("page_size must be in 1..=100");
        }
        if self.workers == 0 {
            return fail("workers must be positive");
        }
        if self.min_window <= TimeDelta::zero() {
            return fail("min_window must be positive");
        }
        if self.call_timeout.is_zero() {
            return fail("call_timeout must be positive");
        }
        if !(self.rate_per_sec.is_finite() && self.rate_per_sec > 0.0) {
            return fail("rate_per_sec must be a positive number");
        }
        if self.burst == 0 {
            return fail("burst must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ExtractConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.ceiling, 10_000);
        assert_eq!(cfg.max_depth, 8);
        assert_eq!(cfg.min_window.num_days(), 7);
    }

    #[test]
    fn rejects_zero_workers() {
        let cfg = ExtractConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ExtractError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_oversized_page() {
        let cfg = ExtractConfig {
            page_size: 500,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_nan_rate() {
        let cfg = ExtractConfig {
            rate_per_sec: f64::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}

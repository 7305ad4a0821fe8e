//! Limit command implementation

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tandem_common::Configuration;
use tandem_limiter::RateLimiter;

pub fn run(
    config: Configuration,
    requests: usize,
    burst: Option<usize>,
    interval_ms: Option<u64>,
) -> Result<()> {
    let grants = execute(config, requests, burst, interval_ms)?;
    for (i, at) in grants.iter().enumerate() {
        println!("request {} granted at +{} ms", i + 1, at.as_millis());
    }
    Ok(())
}

/// Issues `requests` acquisitions and returns when each was granted, relative to the start.
pub fn execute(
    config: Configuration,
    requests: usize,
    burst: Option<usize>,
    interval_ms: Option<u64>,
) -> Result<Vec<Duration>> {
    let capacity = burst.unwrap_or(config.bucket_capacity);
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or(config.refill_interval);
    let limiter =
        RateLimiter::new(capacity, interval).context("Failed to create the rate limiter")?;

    let start = Instant::now();
    let mut grants = Vec::with_capacity(requests);
    for _ in 0..requests {
        limiter.acquire(None)?;
        grants.push(start.elapsed());
    }
    Ok(grants)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_immediate_then_paced() {
        let grants = execute(Configuration::default(), 5, Some(2), Some(30)).unwrap();
        assert_eq!(grants.len(), 5);
        assert!(grants[1] < Duration::from_millis(30));
        assert!(grants[2] >= Duration::from_millis(30));
        assert!(grants[4] >= Duration::from_millis(90));
    }

    #[test]
    fn test_rejects_empty_bucket() {
        assert!(execute(Configuration::default(), 1, Some(0), None).is_err());
    }
}

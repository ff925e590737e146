// src/pipeline/rate_limiter.rs

//! Per-domain request throttling.
//!
//! Each source domain gets its own leaky bucket, created lazily on first
//! use. Callers for the same domain queue behind the bucket's lock in
//! arrival order; different domains never wait on each other. State lives
//! only as long as the limiter (nothing is persisted).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::models::LimiterConfig;
use crate::utils::domain_key;

type Bucket = Arc<AsyncMutex<Option<Instant>>>;

/// Lazily-populated set of per-domain throttles.
pub struct DomainRateLimiter {
    default_interval: Duration,
    overrides: HashMap<String, Duration>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl DomainRateLimiter {
    /// Limiter granting `permits_per_second` to every domain.
    pub fn new(permits_per_second: f64) -> Self {
        Self {
            default_interval: interval(permits_per_second),
            overrides: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter from the `[limiter]` config section.
    pub fn from_config(config: &LimiterConfig) -> Self {
        config
            .overrides
            .iter()
            .fold(Self::new(config.permits_per_second), |limiter, (domain, rate)| {
                limiter.with_override(domain, *rate)
            })
    }

    /// Use a different rate for one domain.
    pub fn with_override(mut self, domain: &str, permits_per_second: f64) -> Self {
        self.overrides
            .insert(domain.to_lowercase(), interval(permits_per_second));
        self
    }

    /// Wait until the locator's domain may be hit again.
    pub async fn acquire(&self, locator: &str) {
        let domain = domain_key(locator);
        let spacing = self
            .overrides
            .get(&domain)
            .copied()
            .unwrap_or(self.default_interval);
        let bucket = self.bucket(&domain);

        let mut last = bucket.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + spacing;
            if ready_at > Instant::now() {
                log::debug!("Throttling {} for {:?}", domain, ready_at - Instant::now());
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Number of domains seen so far.
    pub fn tracked_domains(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn bucket(&self, domain: &str) -> Bucket {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buckets.entry(domain.to_string()).or_default())
    }
}

fn interval(permits_per_second: f64) -> Duration {
    if permits_per_second.is_finite() && permits_per_second > 0.0 {
        Duration::from_secs_f64(1.0 / permits_per_second)
    } else {
        log::warn!(
            "Invalid rate {} permits/s; using 1 permit/s",
            permits_per_second
        );
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_are_spaced() {
        let limiter = DomainRateLimiter::new(1.0);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire("https://example.edu/page").await;
        }

        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_independent() {
        let limiter = DomainRateLimiter::new(1.0);
        let start = Instant::now();

        limiter.acquire("https://a.example/1").await;
        limiter.acquire("https://b.example/1").await;
        limiter.acquire("https://c.example/1").await;

        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(limiter.tracked_domains(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_applies_to_one_domain() {
        let limiter = DomainRateLimiter::new(1.0).with_override("FAST.example", 10.0);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire("https://fast.example/x").await;
        }

        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_queue() {
        let limiter = Arc::new(DomainRateLimiter::new(1.0));
        let start = Instant::now();

        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire(&format!("https://example.edu/{i}")).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(limiter.tracked_domains(), 1);
    }

    #[test]
    fn test_limiter_is_lazy() {
        let limiter = DomainRateLimiter::from_config(&LimiterConfig::default());
        assert_eq!(limiter.tracked_domains(), 0);
    }
}

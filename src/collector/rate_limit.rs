//! Per-exchange rate limiting
//!
//! Each exchange gets a token bucket (capacity = burst, refill = requests per
//! window) kept as a theoretical arrival time (GCRA), so a caller can compute
//! the exact instant its token becomes available and sleep until then. Callers
//! on one bucket hold its lock while waiting, which serves them in FIFO order
//! because the tokio mutex is fair. A cancelled wait consumes no token.
//!
//! An optional global semaphore caps in-flight requests across all exchanges;
//! its slot is held by the returned [`RatePermit`] until the request finishes.
//! A caller takes its token only after it holds a slot, so being cancelled
//! while waiting for the slot leaves the bucket untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

use crate::shutdown::ShutdownCoordinator;
use crate::template::RateLimitSpec;

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// Shutdown was requested while waiting
    #[error("rate limit wait cancelled by shutdown")]
    Cancelled,

    /// No bucket registered for the exchange
    #[error("no rate limit registered for exchange '{0}'")]
    UnknownExchange(String),

    /// Global concurrency limiter was closed
    #[error("concurrency limiter closed")]
    Closed,
}

/// Permission to send one request
#[derive(Debug)]
pub struct RatePermit {
    waited: Duration,
    _slot: Option<OwnedSemaphorePermit>,
}

impl RatePermit {
    /// Time spent waiting for the token (and global slot)
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

#[derive(Debug)]
struct Bucket {
    /// Spacing between tokens
    interval: Duration,
    /// How far ahead of the schedule a request may run (burst - 1 tokens)
    tolerance: Duration,
    /// Theoretical arrival time of the next conforming request
    tat: tokio::sync::Mutex<Option<Instant>>,
}

impl Bucket {
    fn new(spec: &RateLimitSpec) -> Self {
        let interval = spec.min_interval();
        Self {
            interval,
            tolerance: interval.saturating_mul(spec.burst.saturating_sub(1)),
            tat: tokio::sync::Mutex::new(None),
        }
    }
}

/// Token buckets keyed by exchange id
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
    global: Option<Arc<Semaphore>>,
}

impl RateLimiter {
    /// Create a limiter with an optional global cap on in-flight requests
    pub fn new(max_concurrent_requests: Option<usize>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            global: max_concurrent_requests.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, Arc<Bucket>>> {
        // The map is only ever inserted into, so a poisoned guard is still consistent
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register (or replace) the bucket of an exchange
    pub fn register(&self, exchange: &str, spec: &RateLimitSpec) {
        self.buckets()
            .insert(exchange.to_string(), Arc::new(Bucket::new(spec)));
    }

    /// Whether an exchange has a bucket
    pub fn is_registered(&self, exchange: &str) -> bool {
        self.buckets().contains_key(exchange)
    }

    /// Wait for a token of `exchange`
    ///
    /// Never drops a request: returns once the token is available, or
    /// [`AcquireError::Cancelled`] as soon as shutdown is requested.
    pub async fn acquire(
        &self,
        exchange: &str,
        shutdown: &ShutdownCoordinator,
    ) -> Result<RatePermit, AcquireError> {
        let started = Instant::now();
        let bucket = self
            .buckets()
            .get(exchange)
            .cloned()
            .ok_or_else(|| AcquireError::UnknownExchange(exchange.to_string()))?;

        let mut tat = tokio::select! {
            guard = bucket.tat.lock() => guard,
            _ = shutdown.wait_for_shutdown() => return Err(AcquireError::Cancelled),
        };
        let now = Instant::now();
        let allowed_at = tat
            .map_or(now, |t| t.max(now))
            .checked_sub(bucket.tolerance)
            .map_or(now, |t| t.max(now));
        if allowed_at > now {
            tokio::select! {
                _ = sleep_until(allowed_at) => {}
                _ = shutdown.wait_for_shutdown() => return Err(AcquireError::Cancelled),
            }
        }

        // The token is committed only once the global slot is held
        let slot = match &self.global {
            Some(semaphore) => Some(tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.map_err(|_| AcquireError::Closed)?,
                _ = shutdown.wait_for_shutdown() => return Err(AcquireError::Cancelled),
            }),
            None => None,
        };
        let now = Instant::now();
        *tat = Some(tat.map_or(now, |t| t.max(now)) + bucket.interval);
        drop(tat);

        Ok(RatePermit {
            waited: started.elapsed(),
            _slot: slot,
        })
    }
}

//! Collection configuration constants and runtime options

use std::time::Duration;

/// Maximum number of retries of one page after retryable failures.
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// Retry 5 would wait 32s, capped to 30s.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Pause between collection cycles in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000; // 1 minute

/// Consecutive failed pages tolerated before a loop is stopped.
/// A loop stops once the count exceeds this threshold.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Request timeout in milliseconds when the template sets none.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000; // 30 seconds

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    backoff(
        retry_count,
        Duration::from_millis(INITIAL_BACKOFF_MS),
        Duration::from_millis(MAX_BACKOFF_MS),
    )
}

fn backoff(retry_count: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
    initial.saturating_mul(factor).min(max)
}

/// How long a loop keeps collecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Poll until stopped
    Continuous,
    /// Stop after one full pagination cycle
    Once,
}

/// Runtime options shared by every loop of a scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorOptions {
    /// Pause between cycles (templates may override); zero means run once
    pub poll_interval: Duration,
    /// Continuous polling or a single cycle
    pub run_mode: RunMode,
    /// Retries of one page after retryable failures
    pub max_retries: u32,
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Consecutive failures tolerated before a loop is stopped
    pub max_consecutive_failures: u32,
    /// Request timeout (templates may override)
    pub request_timeout: Duration,
    /// Global cap on in-flight requests across exchanges
    pub max_concurrent_requests: Option<usize>,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            run_mode: RunMode::Continuous,
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_concurrent_requests: None,
        }
    }
}

impl CollectorOptions {
    /// Stop every loop after one cycle
    pub fn run_once(mut self) -> Self {
        self.run_mode = RunMode::Once;
        self
    }

    /// Set the pause between cycles; zero switches to run-once mode
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        if interval.is_zero() {
            self.run_mode = RunMode::Once;
        }
        self
    }

    /// Set the retry budget per page
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff bounds
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Set the consecutive-failure threshold
    pub fn with_max_consecutive_failures(mut self, threshold: u32) -> Self {
        self.max_consecutive_failures = threshold;
        self
    }

    /// Set the default request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Cap in-flight requests across all exchanges
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = Some(limit.max(1));
        self
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        backoff(attempt, self.initial_backoff, self.max_backoff)
    }
}

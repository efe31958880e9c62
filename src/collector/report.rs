//! Collection events, summaries and reporters
//!
//! Collection loops never log directly; they describe what happened through
//! [`CollectionEvent`]s handed to a [`Reporter`]. [`LogReporter`] turns events
//! into tracing records and Prometheus metrics.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use super::state::LoopState;
use crate::fetcher::FailureClass;
use crate::metrics;

/// How a collection loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// Stop was requested
    StoppedByRequest,
    /// Loop gave up
    StoppedFatal {
        /// What caused the stop
        reason: String,
    },
    /// Run-once mode finished its cycle
    Completed,
    /// Loop had not finished when the join deadline passed
    StillRunning,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::StoppedByRequest => f.write_str("stopped by request"),
            StopOutcome::StoppedFatal { reason } => write!(f, "stopped: {reason}"),
            StopOutcome::Completed => f.write_str("completed"),
            StopOutcome::StillRunning => f.write_str("still running"),
        }
    }
}

/// Counters of one loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    /// Pages fetched and mapped successfully
    pub pages: u64,
    /// Records appended to the sink
    pub records_appended: u64,
    /// Records rejected as duplicates
    pub duplicates: u64,
    /// Failed fetch steps
    pub failures: u64,
    /// Completed pagination cycles
    pub cycles: u64,
}

/// Final report of one exchange loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeSummary {
    /// Exchange identifier
    pub exchange: String,
    /// How the loop ended
    pub outcome: StopOutcome,
    /// Counters
    pub stats: LoopStats,
}

/// Something observable that happened in a collection loop
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    /// Lifecycle transition
    StateChanged {
        /// Exchange identifier
        exchange: String,
        /// Previous state
        from: LoopState,
        /// New state
        to: LoopState,
    },
    /// A page was fetched, mapped and stored
    PageCollected {
        /// Exchange identifier
        exchange: String,
        /// Currency pair of the job target, as spelled by the exchange
        pair: Option<String>,
        /// Page number within the cycle (1-based)
        page: u32,
        /// Records mapped from the response
        records: usize,
        /// Records appended
        appended: u64,
        /// Records rejected as duplicates
        duplicates: u64,
        /// Time spent waiting for the rate limiter
        rate_limit_wait: Duration,
    },
    /// A pagination cycle finished
    CycleCompleted {
        /// Exchange identifier
        exchange: String,
        /// Pages fetched in the cycle
        pages: u32,
    },
    /// A fetch step failed
    Failure {
        /// Exchange identifier
        exchange: String,
        /// Failure class
        class: FailureClass,
        /// Error message
        message: String,
        /// Consecutive failures including this one
        consecutive_failures: u32,
        /// Delay before the page is retried, when it will be
        retry_in: Option<Duration>,
    },
    /// The loop is stopping because of an unrecoverable condition
    Fatal {
        /// Exchange identifier
        exchange: String,
        /// Class of the failure that ended the loop
        class: FailureClass,
        /// Why the loop stopped
        reason: String,
    },
    /// The loop ended
    Summary(ExchangeSummary),
}

/// Sink for collection events
pub trait Reporter: Send + Sync {
    /// Observe one event; must not block
    fn report(&self, event: CollectionEvent);
}

/// Reporter that logs through tracing and records metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: CollectionEvent) {
        match event {
            CollectionEvent::StateChanged { exchange, from, to } => {
                info!(exchange = %exchange, from = %from, to = %to, "Loop state changed");
                if from == LoopState::Starting && to != LoopState::Stopped {
                    metrics::set_loop_running(true);
                } else if to == LoopState::Stopped && from != LoopState::Starting {
                    metrics::set_loop_running(false);
                }
            }
            CollectionEvent::PageCollected {
                exchange,
                pair,
                page,
                records,
                appended,
                duplicates,
                rate_limit_wait,
            } => {
                info!(
                    exchange = %exchange,
                    pair = pair.as_deref().unwrap_or(""),
                    page,
                    records,
                    appended,
                    duplicates,
                    wait_ms = rate_limit_wait.as_millis() as u64,
                    "Page collected"
                );
                metrics::record_page(&exchange, appended, duplicates);
                metrics::record_rate_limit_wait(&exchange, rate_limit_wait);
            }
            CollectionEvent::CycleCompleted { exchange, pages } => {
                info!(exchange = %exchange, pages, "Collection cycle completed");
            }
            CollectionEvent::Failure {
                exchange,
                class,
                message,
                consecutive_failures,
                retry_in,
            } => {
                metrics::record_failure(&exchange, class.as_str());
                match retry_in {
                    Some(delay) => {
                        warn!(
                            exchange = %exchange,
                            class = class.as_str(),
                            consecutive_failures,
                            "Retrying after {} - waiting {:.1} seconds: {}",
                            class.description(),
                            delay.as_secs_f64(),
                            message
                        );
                        metrics::record_backoff(&exchange, delay);
                    }
                    None => warn!(
                        exchange = %exchange,
                        class = class.as_str(),
                        consecutive_failures,
                        "Page failed ({}): {}",
                        class.description(),
                        message
                    ),
                }
            }
            CollectionEvent::Fatal {
                exchange,
                class,
                reason,
            } => {
                error!(
                    exchange = %exchange,
                    class = class.as_str(),
                    "Collection stopped: {}. Suggestion: {}",
                    reason,
                    class.suggestion()
                );
            }
            CollectionEvent::Summary(summary) => {
                info!(
                    exchange = %summary.exchange,
                    outcome = %summary.outcome,
                    pages = summary.stats.pages,
                    records = summary.stats.records_appended,
                    duplicates = summary.stats.duplicates,
                    failures = summary.stats.failures,
                    "Collection finished"
                );
            }
        }
    }
}

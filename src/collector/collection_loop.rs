//! Per-exchange collection loop
//!
//! One loop per exchange walks its job's targets (one per currency pair) in
//! order, following the template's pagination for each. Every request is paced
//! through the exchange's rate-limit bucket; each page is mapped into canonical
//! records and appended to the sink as one batch, so a page is stored whole or
//! not at all. Failures are handled by class:
//!
//! - Transient network, rate limited, server error: retry the same page with
//!   exponential backoff (or the server's `Retry-After`) up to `max_retries`,
//!   then abandon the current target
//! - Invalid body, mapping failure: discard the response and abandon the current
//!   target
//! - Client error, invalid request: stop the loop
//! - Sink failure: retry the batch once, then stop the loop
//!
//! An abandoned target does not hold up the others; the cycle carries on with
//! the next target but is not counted as completed.
//!
//! Every failure counts towards the consecutive-failure threshold; exceeding it
//! stops the loop. Every suspension point races against shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

use super::config::{CollectorOptions, RunMode};
use super::job::CollectionJob;
use super::rate_limit::{AcquireError, RateLimiter};
use super::report::{CollectionEvent, ExchangeSummary, LoopStats, Reporter, StopOutcome};
use super::state::{CollectionState, LoopState};
use crate::fetcher::{FailureClass, FetchFailure, RequestExecutor};
use crate::mapper::map_response;
use crate::shutdown::SharedShutdown;
use crate::sink::{AppendOutcome, Sink, SinkError};
use crate::{CanonicalRecord, FieldValue};

/// What the loop does after one step
enum Step {
    /// Fetch the next page (or retry the current one)
    Continue,
    /// Current target done; `completed` is false when it was abandoned
    TargetEnded { completed: bool },
    /// Leave the loop
    Stop(StopOutcome),
}

/// Shared collaborators of every loop
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub executor: RequestExecutor,
    pub limiter: Arc<RateLimiter>,
    pub sink: Arc<dyn Sink>,
    pub reporter: Arc<dyn Reporter>,
    pub shutdown: SharedShutdown,
    pub options: CollectorOptions,
}

/// Collection loop of one exchange
pub(crate) struct CollectionLoop {
    job: CollectionJob,
    ctx: LoopContext,
    state: CollectionState,
    stats: LoopStats,
    /// Pages stored in the current cycle, across targets
    cycle_pages: u32,
    /// A target of the current cycle was abandoned
    cycle_failed: bool,
}

impl CollectionLoop {
    pub fn new(job: CollectionJob, ctx: LoopContext) -> Self {
        Self {
            job,
            ctx,
            state: CollectionState::new(),
            stats: LoopStats::default(),
            cycle_pages: 0,
            cycle_failed: false,
        }
    }

    fn exchange(&self) -> String {
        self.job.exchange().to_string()
    }

    fn report(&self, event: CollectionEvent) {
        self.ctx.reporter.report(event);
    }

    fn enter(&mut self, to: LoopState) {
        if let Some(from) = self.state.transition(to) {
            self.report(CollectionEvent::StateChanged {
                exchange: self.exchange(),
                from,
                to,
            });
        }
    }

    fn poll_interval(&self) -> Duration {
        self.job
            .template()
            .poll_interval
            .unwrap_or(self.ctx.options.poll_interval)
    }

    /// Run until stopped and return the loop's summary
    pub async fn run(mut self) -> ExchangeSummary {
        self.enter(LoopState::Running);

        let outcome = loop {
            if self.ctx.shutdown.is_shutdown_requested() {
                break StopOutcome::StoppedByRequest;
            }
            match self.step().await {
                Step::Continue => {}
                Step::Stop(outcome) => break outcome,
                Step::TargetEnded { completed } => {
                    self.cycle_failed |= !completed;
                    if self.state.next_target(self.job.targets().len()) {
                        continue;
                    }
                    if !self.cycle_failed {
                        self.stats.cycles += 1;
                        self.report(CollectionEvent::CycleCompleted {
                            exchange: self.exchange(),
                            pages: self.cycle_pages,
                        });
                    }
                    if self.ctx.options.run_mode == RunMode::Once {
                        break StopOutcome::Completed;
                    }
                    if !self.pause(self.poll_interval()).await {
                        break StopOutcome::StoppedByRequest;
                    }
                    self.state.restart_cycle();
                    self.cycle_pages = 0;
                    self.cycle_failed = false;
                }
            }
        };

        self.enter(LoopState::Stopped);
        let summary = ExchangeSummary {
            exchange: self.exchange(),
            outcome,
            stats: self.stats,
        };
        self.report(CollectionEvent::Summary(summary.clone()));
        summary
    }

    /// Back off for `delay`; false when shutdown interrupted the wait
    async fn pause(&mut self, delay: Duration) -> bool {
        self.enter(LoopState::BackingOff);
        let until = Instant::now() + delay;
        self.state.next_request_at = Some(until);
        let shutdown = self.ctx.shutdown.clone();
        let resumed = tokio::select! {
            _ = sleep_until(until) => true,
            _ = shutdown.wait_for_shutdown() => false,
        };
        if resumed {
            self.state.next_request_at = None;
            self.enter(LoopState::Running);
        }
        resumed
    }

    async fn step(&mut self) -> Step {
        let exchange = self.exchange();
        let shutdown = self.ctx.shutdown.clone();

        let permit = match self.ctx.limiter.acquire(&exchange, &shutdown).await {
            Ok(permit) => permit,
            Err(AcquireError::Cancelled) => return Step::Stop(StopOutcome::StoppedByRequest),
            Err(e) => return self.fatal(FailureClass::InvalidRequest, e.to_string()),
        };

        let Some(target) = self.job.targets().get(self.state.target) else {
            return self.fatal(FailureClass::InvalidRequest, "job has no request target".to_string());
        };
        let symbol = target.symbol().map(str::to_string);

        let fetched = tokio::select! {
            result = self.ctx.executor.fetch_step(&self.job, target, &self.state.pagination) => result,
            _ = shutdown.wait_for_shutdown() => return Step::Stop(StopOutcome::StoppedByRequest),
        };
        let rate_limit_wait = permit.waited();
        drop(permit);

        let page = match fetched {
            Ok(page) => page,
            Err(failure) => return self.on_fetch_failure(failure).await,
        };

        let mut records = match map_response(self.job.template(), &page.body, page.received_at) {
            Ok(records) => records,
            Err(e) => return self.on_discarded(FailureClass::Mapping, e.to_string()),
        };
        if let Some(symbol) = &symbol {
            records = records
                .into_iter()
                .map(|record| record.with_default_field("symbol", FieldValue::String(symbol.clone())))
                .collect();
        }
        let mapped = records.len();

        // Appends are never raced against cancellation
        let (appended, duplicates) = match self.store(records).await {
            Ok(counts) => counts,
            Err(e) => {
                self.count_failure(FailureClass::Sink, e.to_string(), None);
                return self.fatal(FailureClass::Sink, format!("sink failure after retry: {e}"));
            }
        };

        self.state.record_success(page.next);
        self.cycle_pages += 1;
        self.stats.pages += 1;
        self.stats.records_appended += appended;
        self.stats.duplicates += duplicates;
        self.report(CollectionEvent::PageCollected {
            exchange,
            pair: symbol,
            page: self.state.pagination.pages_fetched(),
            records: mapped,
            appended,
            duplicates,
            rate_limit_wait,
        });

        if self.state.pagination.is_done() {
            Step::TargetEnded { completed: true }
        } else {
            Step::Continue
        }
    }

    /// Append one page as a batch, retrying a failed batch once
    ///
    /// Returns the appended and duplicate counts.
    async fn store(&self, records: Vec<CanonicalRecord>) -> Result<(u64, u64), SinkError> {
        if records.is_empty() {
            return Ok((0, 0));
        }
        let outcomes = match self.ctx.sink.append_batch(records.clone()).await {
            Ok(outcomes) => outcomes,
            Err(_) => self.ctx.sink.append_batch(records).await?,
        };
        let appended = outcomes
            .iter()
            .filter(|outcome| **outcome == AppendOutcome::Appended)
            .count() as u64;
        Ok((appended, outcomes.len() as u64 - appended))
    }

    /// Count a failure and report it; returns the consecutive-failure count
    fn count_failure(&mut self, class: FailureClass, message: String, retry_in: Option<Duration>) -> u32 {
        let consecutive_failures = self.state.record_failure();
        self.stats.failures += 1;
        self.report(CollectionEvent::Failure {
            exchange: self.exchange(),
            class,
            message,
            consecutive_failures,
            retry_in,
        });
        consecutive_failures
    }

    fn threshold_exceeded(&self, consecutive_failures: u32) -> bool {
        consecutive_failures > self.ctx.options.max_consecutive_failures
    }

    fn fatal(&self, class: FailureClass, reason: String) -> Step {
        self.report(CollectionEvent::Fatal {
            exchange: self.exchange(),
            class,
            reason: reason.clone(),
        });
        Step::Stop(StopOutcome::StoppedFatal { reason })
    }

    fn threshold_stop(&self, class: FailureClass, count: u32, last: &str) -> Step {
        self.fatal(
            class,
            format!("{count} consecutive failures, last: {last}"),
        )
    }

    /// Response discarded: count the failure and abandon the current target
    fn on_discarded(&mut self, class: FailureClass, message: String) -> Step {
        let count = self.count_failure(class, message.clone(), None);
        if self.threshold_exceeded(count) {
            return self.threshold_stop(class, count, &message);
        }
        Step::TargetEnded { completed: false }
    }

    async fn on_fetch_failure(&mut self, failure: FetchFailure) -> Step {
        let class = failure.class();
        let message = failure.to_string();

        if !class.is_retryable() {
            return match class {
                FailureClass::ClientError | FailureClass::InvalidRequest => {
                    self.count_failure(class, message.clone(), None);
                    self.fatal(class, message)
                }
                _ => self.on_discarded(class, message),
            };
        }

        let retry_in = (self.state.attempt < self.ctx.options.max_retries).then(|| match &failure {
            FetchFailure::RateLimited {
                retry_after: Some(delay),
            } => *delay,
            _ => self.ctx.options.backoff_for(self.state.attempt),
        });

        let count = self.count_failure(class, message.clone(), retry_in);
        if self.threshold_exceeded(count) {
            return self.threshold_stop(class, count, &message);
        }

        match retry_in {
            Some(delay) => {
                self.state.attempt += 1;
                if self.pause(delay).await {
                    Step::Continue
                } else {
                    Step::Stop(StopOutcome::StoppedByRequest)
                }
            }
            // Retries exhausted
            None => Step::TargetEnded { completed: false },
        }
    }
}

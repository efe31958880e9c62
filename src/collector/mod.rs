//! Collection orchestration and rate limiting
//!
//! The collector runs one independent loop per exchange. Each loop owns its
//! pagination progress and failure counters; loops share only the HTTP
//! transport, the sink, the reporter and the rate limiter.
//!
//! # Overview
//!
//! 1. **Job Creation**: bind a validated template to parameter values and
//!    credentials with [`CollectionJob::new`], or to a list of currency pairs
//!    with [`CollectionJob::with_pairs`]
//! 2. **Scheduling**: [`Scheduler::start`] registers a token bucket per exchange
//!    and spawns the loops
//! 3. **Rate Limiting**: every request waits on [`RateLimiter::acquire`]
//! 4. **Lifecycle**: loops move through [`LoopState`]
//!    (`starting -> running <-> backing_off -> stopped`)
//! 5. **Reporting**: loops emit [`CollectionEvent`]s to a [`Reporter`] and end with
//!    an [`ExchangeSummary`]
//!
//! # Error Handling
//!
//! Failures never cross loop boundaries. Retryable failures (network, rate
//! limited, server errors) back off and retry the same page; unusable responses
//! abandon the current target and the loop moves on to the next one; client
//! errors and sink failures stop the loop.
//!
//! # Cancellation
//!
//! [`SchedulerHandle::stop`] requests shutdown. Loops observe it at every
//! suspension point (rate-limit wait, in-flight request, backoff sleep) and stop
//! without appending partial pages.

mod collection_loop;
pub mod config;
pub mod job;
pub mod rate_limit;
pub mod report;
pub mod scheduler;
pub mod state;

pub use config::{calculate_backoff, CollectorOptions, RunMode};
pub use job::{BoundParam, CollectionJob, JobTarget};
pub use rate_limit::{AcquireError, RateLimiter, RatePermit};
pub use report::{CollectionEvent, ExchangeSummary, LogReporter, LoopStats, Reporter, StopOutcome};
pub use scheduler::{validate_documents, RejectedTemplate, Scheduler, SchedulerError, SchedulerHandle};
pub use state::{CollectionState, LoopState};

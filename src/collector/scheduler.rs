//! Scheduler driving one collection loop per exchange

use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};

use super::collection_loop::{CollectionLoop, LoopContext};
use super::config::CollectorOptions;
use super::job::CollectionJob;
use super::rate_limit::RateLimiter;
use super::report::{ExchangeSummary, LoopStats, Reporter, StopOutcome};
use crate::fetcher::{HttpTransport, RequestExecutor};
use crate::shutdown::{ShutdownCoordinator, SharedShutdown};
use crate::sink::Sink;
use crate::template::validator::validate_request;
use crate::template::{RequestTemplate, ValidationErrors};

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// No jobs were given
    #[error("no collection jobs given")]
    NoJobs,

    /// Two jobs target the same exchange
    #[error("more than one job for exchange '{0}'")]
    DuplicateExchange(String),

    /// One or more template documents were rejected
    #[error("{} template(s) rejected", .0.len())]
    InvalidTemplates(Vec<RejectedTemplate>),
}

/// A template document that failed validation
#[derive(Debug, Clone)]
pub struct RejectedTemplate {
    /// Position of the document in the input
    pub index: usize,
    /// Every validation error of the document
    pub errors: ValidationErrors,
}

/// Validate a batch of request template documents
///
/// Succeeds only when every document is valid. Otherwise the full error list of
/// every rejected document is returned, so nothing is started with a partially
/// valid configuration.
pub fn validate_documents<'a, I>(documents: I) -> Result<Vec<RequestTemplate>, SchedulerError>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut templates = Vec::new();
    let mut rejected = Vec::new();
    for (index, document) in documents.into_iter().enumerate() {
        match validate_request(document) {
            Ok(template) => templates.push(template),
            Err(errors) => rejected.push(RejectedTemplate { index, errors }),
        }
    }
    if rejected.is_empty() {
        Ok(templates)
    } else {
        Err(SchedulerError::InvalidTemplates(rejected))
    }
}

/// Starts collection loops
///
/// Loops share the transport, the sink, the reporter and one rate limiter with a
/// bucket per exchange. Nothing else is shared between them.
pub struct Scheduler {
    transport: Arc<dyn HttpTransport>,
    sink: Arc<dyn Sink>,
    reporter: Arc<dyn Reporter>,
    options: CollectorOptions,
    shutdown: SharedShutdown,
}

impl Scheduler {
    /// Create a scheduler with its own shutdown coordinator
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn Sink>,
        reporter: Arc<dyn Reporter>,
        options: CollectorOptions,
    ) -> Self {
        Self {
            transport,
            sink,
            reporter,
            options,
            shutdown: ShutdownCoordinator::shared(),
        }
    }

    /// Use an existing shutdown coordinator (e.g. the process-wide one)
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Spawn one loop per job
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, jobs: Vec<CollectionJob>) -> Result<SchedulerHandle, SchedulerError> {
        if jobs.is_empty() {
            return Err(SchedulerError::NoJobs);
        }
        let mut seen = HashSet::new();
        for job in &jobs {
            if !seen.insert(job.exchange().to_string()) {
                return Err(SchedulerError::DuplicateExchange(job.exchange().to_string()));
            }
        }

        let limiter = Arc::new(RateLimiter::new(self.options.max_concurrent_requests));
        for job in &jobs {
            limiter.register(job.exchange(), &job.template().rate_limit);
        }

        let ctx = LoopContext {
            executor: RequestExecutor::new(self.transport.clone(), self.options.request_timeout),
            limiter,
            sink: self.sink.clone(),
            reporter: self.reporter.clone(),
            shutdown: self.shutdown.clone(),
            options: self.options.clone(),
        };

        let loops = jobs
            .into_iter()
            .map(|job| {
                let exchange = job.exchange().to_string();
                let task = tokio::spawn(CollectionLoop::new(job, ctx.clone()).run());
                (exchange, task)
            })
            .collect();

        Ok(SchedulerHandle {
            shutdown: self.shutdown.clone(),
            loops,
        })
    }
}

/// Handle to running loops
pub struct SchedulerHandle {
    shutdown: SharedShutdown,
    loops: Vec<(String, JoinHandle<ExchangeSummary>)>,
}

impl SchedulerHandle {
    /// Ask every loop to stop; returns immediately
    pub fn stop(&self) {
        self.shutdown.request_shutdown();
    }

    /// Shutdown coordinator the loops observe
    pub fn shutdown(&self) -> SharedShutdown {
        self.shutdown.clone()
    }

    /// Exchanges with a loop, in start order
    pub fn exchanges(&self) -> Vec<&str> {
        self.loops.iter().map(|(exchange, _)| exchange.as_str()).collect()
    }

    /// Wait for every loop to end
    pub async fn join(self) -> Vec<ExchangeSummary> {
        let (exchanges, tasks): (Vec<_>, Vec<_>) = self.loops.into_iter().unzip();
        join_all(tasks)
            .await
            .into_iter()
            .zip(exchanges)
            .map(|(result, exchange)| finished(exchange, result))
            .collect()
    }

    /// Wait up to `limit` for every loop to end
    ///
    /// Loops still running at the deadline are reported as
    /// [`StopOutcome::StillRunning`] and keep running detached.
    pub async fn join_timeout(self, limit: Duration) -> Vec<ExchangeSummary> {
        let deadline = Instant::now() + limit;
        let mut summaries = Vec::with_capacity(self.loops.len());
        for (exchange, mut task) in self.loops {
            let summary = match timeout_at(deadline, &mut task).await {
                Ok(result) => finished(exchange, result),
                Err(_) => ExchangeSummary {
                    exchange,
                    outcome: StopOutcome::StillRunning,
                    stats: LoopStats::default(),
                },
            };
            summaries.push(summary);
        }
        summaries
    }

    /// Request stop, then wait up to `limit` for the loops to end
    pub async fn stop_and_join(self, limit: Duration) -> Vec<ExchangeSummary> {
        self.stop();
        self.join_timeout(limit).await
    }
}

fn finished(exchange: String, result: Result<ExchangeSummary, JoinError>) -> ExchangeSummary {
    result.unwrap_or_else(|e| ExchangeSummary {
        exchange,
        outcome: StopOutcome::StoppedFatal {
            reason: format!("loop task failed: {e}"),
        },
        stats: LoopStats::default(),
    })
}

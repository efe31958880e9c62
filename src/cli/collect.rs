//! Collect command implementation

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::config::{load_document, RunConfig};
use super::CliError;
use crate::collector::{CollectionJob, ExchangeSummary, LogReporter, Scheduler, StopOutcome};
use crate::fetcher::http::ReqwestTransport;
use crate::output::ExportEngine;
use crate::shutdown::SharedShutdown;
use crate::sink::{MemorySink, Sink};
use crate::template::validator::{validate_export, validate_request};
use crate::template::ExportTemplate;

/// Collect market data as described by a run configuration
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// Run configuration file (JSON)
    pub config: PathBuf,

    /// Stop every exchange after one pagination cycle
    #[arg(long, default_value_t = false)]
    pub once: bool,

    /// Stop collecting after this many seconds
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Print exchange summaries as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl CollectArgs {
    /// Run collection until stopped, then export when configured
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<Vec<ExchangeSummary>, CliError> {
        let config = RunConfig::load(&self.config)?;

        // Validate every file before any loop starts
        let mut jobs = Vec::with_capacity(config.jobs.len());
        let mut first_error = None;
        for job in &config.jobs {
            match prepare_job(job) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    eprintln!("{e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        let export = match &config.export {
            Some(export) => match load_export(&export.template) {
                Ok(template) => Some((ExportEngine::new(template), export.output.clone())),
                Err(e) => {
                    eprintln!("{e}");
                    first_error.get_or_insert(e);
                    None
                }
            },
            None => None,
        };
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut options = config.options.to_options();
        if self.once {
            options = options.run_once();
        }

        let sink = Arc::new(MemorySink::new());
        let scheduler = Scheduler::new(
            Arc::new(ReqwestTransport::new()?),
            sink.clone(),
            Arc::new(LogReporter),
            options,
        )
        .with_shutdown(shutdown.clone());

        let handle = scheduler.start(jobs)?;
        info!(exchanges = ?handle.exchanges(), "Collection started");

        if let Some(secs) = self.duration_secs {
            let stopper = handle.shutdown();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                        info!("Collection duration elapsed, stopping");
                        stopper.request_shutdown();
                    }
                    _ = stopper.wait_for_shutdown() => {}
                }
            });
        }

        let summaries = handle.join().await;
        self.print_summaries(&summaries)?;

        if let Some((engine, output)) = export {
            let snapshot = sink.snapshot().await?;
            let written = engine.export_to_file(&snapshot, &output)?;
            info!(
                records = snapshot.len(),
                lines = written,
                "Export written to {}",
                output.display()
            );
        }

        Ok(summaries)
    }

    fn print_summaries(&self, summaries: &[ExchangeSummary]) -> Result<(), CliError> {
        if self.json {
            let json = serde_json::to_string_pretty(summaries)
                .map_err(|e| CliError::InvalidArgument(format!("Failed to serialize summaries: {e}")))?;
            println!("{json}");
            return Ok(());
        }

        for summary in summaries {
            if let StopOutcome::StoppedFatal { reason } = &summary.outcome {
                warn!(exchange = %summary.exchange, "Exchange stopped early: {}", reason);
            }
            println!(
                "{}: {} ({} pages, {} records, {} duplicates, {} failures)",
                summary.exchange,
                summary.outcome,
                summary.stats.pages,
                summary.stats.records_appended,
                summary.stats.duplicates,
                summary.stats.failures
            );
        }
        Ok(())
    }
}

fn prepare_job(job: &super::config::JobConfig) -> Result<CollectionJob, CliError> {
    let document = load_document(&job.template)?;
    let template = validate_request(&document).map_err(|errors| CliError::InvalidTemplate {
        path: job.template.clone(),
        errors,
    })?;
    let credentials = job.credentials.resolve();
    let prepared = if job.pairs.is_empty() {
        CollectionJob::new(template, job.bindings.clone(), credentials)
    } else {
        CollectionJob::with_pairs(template, job.bindings.clone(), job.pairs.clone(), credentials)
    };
    prepared.map_err(|errors| CliError::InvalidJob {
        template: job.template.clone(),
        errors,
    })
}

fn load_export(path: &Path) -> Result<ExportTemplate, CliError> {
    let document = load_document(path)?;
    validate_export(&document).map_err(|errors| CliError::InvalidTemplate {
        path: path.to_path_buf(),
        errors,
    })
}

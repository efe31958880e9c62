//! CLI error types and conversions

use std::path::PathBuf;

use crate::collector::SchedulerError;
use crate::fetcher::TransportError;
use crate::output::ExportError;
use crate::sink::SinkError;
use crate::template::ValidationErrors;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// A template file failed validation
    #[error("invalid template {}: {errors}", path.display())]
    InvalidTemplate {
        /// Template file
        path: PathBuf,
        /// Every problem found
        errors: ValidationErrors,
    },

    /// A job's bindings or credentials do not satisfy its template
    #[error("invalid job for {}: {errors}", template.display())]
    InvalidJob {
        /// Template file of the job
        template: PathBuf,
        /// Every problem found
        errors: ValidationErrors,
    },

    /// One or more files failed validation
    #[error("{0} file(s) failed validation")]
    ValidationFailed(usize),

    /// Scheduler error
    #[error("scheduler error: {0}")]
    SchedulerError(#[from] SchedulerError),

    /// Transport setup error
    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),

    /// Sink error
    #[error("sink error: {0}")]
    SinkError(#[from] SinkError),

    /// Export error
    #[error("export error: {0}")]
    ExportError(#[from] ExportError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

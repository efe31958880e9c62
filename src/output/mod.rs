//! Export of collected data
//!
//! [`ExportEngine`] combines an export template with a sink snapshot and yields
//! serialized lines (delimited text or JSON lines). [`csv::LineFileWriter`]
//! streams those lines into a buffered file.

pub mod csv;
pub mod export;

pub use csv::LineFileWriter;
pub use export::{ExportEngine, ExportLines};

/// Export errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The filter or order key names a field absent from the snapshot
    #[error("unknown field '{field}' in {context}")]
    UnknownField {
        /// Field name
        field: String,
        /// Which part of the template referenced it
        context: &'static str,
    },

    /// Delimited text encoding failed
    #[error("CSV error: {0}")]
    Csv(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Value could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;

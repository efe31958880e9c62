//! Delimited text encoding and buffered line output

use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use super::{ExportError, ExportResult, ExportLines};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Encode one row of delimited text, without the line terminator
///
/// Values containing the delimiter, quotes or line breaks are quoted.
pub fn encode_row<S: AsRef<[u8]>>(values: &[S], delimiter: u8) -> ExportResult<String> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(values)
        .map_err(|e| ExportError::Csv(format!("Failed to encode row: {}", e)))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(format!("Failed to finish row: {}", e)))?;
    let mut line = String::from_utf8(bytes)
        .map_err(|e| ExportError::Csv(format!("Row is not UTF-8: {}", e)))?;
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

/// Buffered writer of newline-terminated lines
pub struct LineFileWriter {
    writer: BufWriter<File>,
    lines_written: u64,
}

impl LineFileWriter {
    /// Create (or truncate) the file at `path`
    ///
    /// Missing parent directories are created.
    pub fn new<P: AsRef<Path>>(path: P) -> ExportResult<Self> {
        Self::new_with_buffer_size(path, DEFAULT_BUFFER_SIZE)
    }

    /// Create the file with a custom write buffer size
    pub fn new_with_buffer_size<P: AsRef<Path>>(path: P, buffer_size: usize) -> ExportResult<Self> {
        let path = path.as_ref();
        info!("Creating export file: path={}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ExportError::Io(format!("Failed to create directory: {}", e)))?;
            }
        }

        let file = File::create(path)
            .map_err(|e| ExportError::Io(format!("Failed to create file: {}", e)))?;

        Ok(Self {
            writer: BufWriter::with_capacity(buffer_size, file),
            lines_written: 0,
        })
    }

    /// Number of lines written so far
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Append one line
    pub fn write_line(&mut self, line: &str) -> ExportResult<()> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| ExportError::Io(format!("Failed to write line: {}", e)))?;
        self.lines_written += 1;

        if self.lines_written % 1000 == 0 {
            debug!("Progress: {} lines written", self.lines_written);
        }
        Ok(())
    }

    /// Write every line of an export
    pub fn write_all(&mut self, lines: ExportLines) -> ExportResult<u64> {
        let before = self.lines_written;
        for line in lines {
            self.write_line(&line?)?;
        }
        Ok(self.lines_written - before)
    }

    /// Flush buffered data
    pub fn flush(&mut self) -> ExportResult<()> {
        self.writer
            .flush()
            .map_err(|e| ExportError::Io(format!("Failed to flush: {}", e)))
    }

    /// Flush, sync to disk and close
    pub fn close(mut self) -> ExportResult<()> {
        self.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| ExportError::Io(format!("Failed to get file handle: {}", e)))?;
        file.sync_all()
            .map_err(|e| ExportError::Io(format!("Failed to sync file: {}", e)))?;

        info!("Export file closed: {} lines written", self.lines_written);
        Ok(())
    }
}

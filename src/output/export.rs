//! Export engine
//!
//! Rendering happens in two steps. [`ExportEngine::render`] checks the template
//! against the snapshot, applies the filter and the ordering, and returns an
//! [`ExportLines`] iterator. Lines are serialized one at a time as the iterator
//! is consumed, and a clone of the iterator starts over from its own position.

use chrono::SecondsFormat;
use rust_decimal::RoundingStrategy;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use super::csv::{encode_row, LineFileWriter};
use super::{ExportError, ExportResult};
use crate::sink::SinkSnapshot;
use crate::template::{ColumnFormat, CompareOp, ExportFormat, ExportTemplate, Filter};
use crate::{CanonicalRecord, FieldValue};

/// Turns sink snapshots into serialized lines
#[derive(Debug, Clone)]
pub struct ExportEngine {
    template: Arc<ExportTemplate>,
}

impl ExportEngine {
    /// Create an engine for a validated export template
    pub fn new(template: ExportTemplate) -> Self {
        Self {
            template: Arc::new(template),
        }
    }

    /// The export template
    pub fn template(&self) -> &ExportTemplate {
        &self.template
    }

    /// Select, order and prepare the records of `snapshot` for serialization
    ///
    /// Fails with [`ExportError::UnknownField`] when the filter or the order key
    /// names a field that no record of a non-empty snapshot carries. Columns may
    /// name absent fields; those cells hold the template's null value.
    pub fn render(&self, snapshot: &SinkSnapshot) -> ExportResult<ExportLines> {
        if !snapshot.is_empty() {
            let observed = snapshot.observed_fields();
            if let Some(filter) = &self.template.filter {
                if let Some(field) = filter.fields().into_iter().find(|f| !observed.contains(*f)) {
                    return Err(ExportError::UnknownField {
                        field: field.to_string(),
                        context: "filter",
                    });
                }
            }
            if let Some(order) = &self.template.order_by {
                if !observed.contains(&order.field) {
                    return Err(ExportError::UnknownField {
                        field: order.field.clone(),
                        context: "order_by",
                    });
                }
            }
        }

        let selected = (0..snapshot.len()).filter_map(|i| snapshot.get(i)).filter(|record| {
            self.template
                .filter
                .as_ref()
                .map_or(true, |filter| matches(filter, record))
        });

        let rows: Vec<Arc<CanonicalRecord>> = match &self.template.order_by {
            None => selected.cloned().collect(),
            Some(order) => {
                let mut keyed: Vec<(FieldValue, Arc<CanonicalRecord>)> = selected
                    .map(|record| (record.value(&order.field), record.clone()))
                    .collect();
                // Stable; absent keys go last in either direction
                keyed.sort_by(|(a, _), (b, _)| match (a.is_absent(), b.is_absent()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ordering = a.compare(b).unwrap_or(Ordering::Equal);
                        if order.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    }
                });
                keyed.into_iter().map(|(_, record)| record).collect()
            }
        };

        let header_pending = self.template.include_header
            && matches!(self.template.format, ExportFormat::DelimitedText { .. });

        Ok(ExportLines {
            template: self.template.clone(),
            rows: rows.into(),
            next: 0,
            header_pending,
        })
    }

    /// Render `snapshot` into a file, returning the number of lines written
    pub fn export_to_file<P: AsRef<Path>>(&self, snapshot: &SinkSnapshot, path: P) -> ExportResult<u64> {
        let lines = self.render(snapshot)?;
        let mut writer = LineFileWriter::new(path)?;
        let written = writer.write_all(lines)?;
        writer.close()?;
        Ok(written)
    }
}

/// Lazy sequence of serialized export lines
///
/// Cloning yields an independent iterator; the underlying rows are shared.
#[derive(Debug, Clone)]
pub struct ExportLines {
    template: Arc<ExportTemplate>,
    rows: Arc<[Arc<CanonicalRecord>]>,
    next: usize,
    header_pending: bool,
}

impl ExportLines {
    /// Number of data rows (header excluded)
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Stream every remaining line, newline-terminated, into `writer`
    ///
    /// Returns the number of lines written.
    pub fn write_to<W: Write>(self, writer: &mut W) -> ExportResult<u64> {
        let mut written = 0;
        for line in self {
            let line = line?;
            writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|e| ExportError::Io(e.to_string()))?;
            written += 1;
        }
        writer.flush().map_err(|e| ExportError::Io(e.to_string()))?;
        Ok(written)
    }

    fn header(&self) -> ExportResult<String> {
        let headers: Vec<&str> = self.template.columns.iter().map(|c| c.header.as_str()).collect();
        match self.template.format {
            ExportFormat::DelimitedText { delimiter } => encode_row(&headers, delimiter),
            ExportFormat::JsonLines => Ok(String::new()),
        }
    }

    fn line(&self, record: &CanonicalRecord) -> ExportResult<String> {
        let template = &self.template;
        match template.format {
            ExportFormat::DelimitedText { delimiter } => {
                let cells = template
                    .columns
                    .iter()
                    .map(|column| {
                        format_text(&record.value(&column.field), &column.format)
                            .map(|text| text.unwrap_or_else(|| template.null_value.clone()))
                    })
                    .collect::<ExportResult<Vec<String>>>()?;
                encode_row(&cells, delimiter)
            }
            ExportFormat::JsonLines => {
                // Built by hand so keys keep column order
                let mut line = String::from("{");
                for (i, column) in template.columns.iter().enumerate() {
                    if i > 0 {
                        line.push(',');
                    }
                    let value = json_value(&record.value(&column.field), &column.format)?;
                    let key = serde_json::to_string(&column.header)
                        .map_err(|e| ExportError::Serialization(e.to_string()))?;
                    let value = serde_json::to_string(&value)
                        .map_err(|e| ExportError::Serialization(e.to_string()))?;
                    line.push_str(&key);
                    line.push(':');
                    line.push_str(&value);
                }
                line.push('}');
                Ok(line)
            }
        }
    }
}

impl Iterator for ExportLines {
    type Item = ExportResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.header_pending {
            self.header_pending = false;
            return Some(self.header());
        }
        let record = self.rows.get(self.next)?.clone();
        self.next += 1;
        Some(self.line(&record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.rows.len() - self.next + usize::from(self.header_pending);
        (remaining, Some(remaining))
    }
}

/// Evaluate a filter; comparisons against absent values never match
fn matches(filter: &Filter, record: &CanonicalRecord) -> bool {
    match filter {
        Filter::Compare { field, op, value } => {
            let actual = record.value(field);
            match actual.compare(value) {
                Some(ordering) => holds(*op, ordering),
                None => false,
            }
        }
        Filter::All(filters) => filters.iter().all(|f| matches(f, record)),
        Filter::Any(filters) => filters.iter().any(|f| matches(f, record)),
        Filter::Not(inner) => !matches(inner, record),
    }
}

fn holds(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
    }
}

/// Text form of a cell; `None` when the value is absent
///
/// A format that does not apply to the value's type falls back to the plain
/// rendering.
fn format_text(value: &FieldValue, format: &ColumnFormat) -> ExportResult<Option<String>> {
    if value.is_absent() {
        return Ok(None);
    }
    let text = match (format, value) {
        (ColumnFormat::Decimal(places), _) if value.as_decimal().is_some() => {
            let rounded = value
                .as_decimal()
                .unwrap_or_default()
                .round_dp_with_strategy(*places, RoundingStrategy::MidpointAwayFromZero);
            format!("{:.*}", *places as usize, rounded)
        }
        (ColumnFormat::TimestampMillis, FieldValue::Timestamp(t)) => t.timestamp_millis().to_string(),
        (ColumnFormat::TimestampSeconds, FieldValue::Timestamp(t)) => t.timestamp().to_string(),
        (ColumnFormat::Rfc3339, FieldValue::Timestamp(t)) => {
            t.to_rfc3339_opts(SecondsFormat::Millis, true)
        }
        (ColumnFormat::TimestampPattern(pattern), FieldValue::Timestamp(t)) => {
            let mut out = String::new();
            write!(out, "{}", t.format(pattern))
                .map_err(|_| ExportError::Serialization(format!("invalid timestamp pattern '{pattern}'")))?;
            out
        }
        (ColumnFormat::Upper, _) => value.render().unwrap_or_default().to_uppercase(),
        (ColumnFormat::Lower, _) => value.render().unwrap_or_default().to_lowercase(),
        _ => value.render().unwrap_or_default(),
    };
    Ok(Some(text))
}

/// JSON form of a cell
///
/// Integers, booleans and epoch timestamps stay numeric; decimals are written as
/// strings so no precision is lost.
fn json_value(value: &FieldValue, format: &ColumnFormat) -> ExportResult<Value> {
    Ok(match (value, format) {
        (FieldValue::Absent, _) => Value::Null,
        (FieldValue::Timestamp(t), ColumnFormat::TimestampMillis) => Value::from(t.timestamp_millis()),
        (FieldValue::Timestamp(t), ColumnFormat::TimestampSeconds) => Value::from(t.timestamp()),
        (FieldValue::Integer(i), ColumnFormat::Plain) => Value::from(*i),
        (FieldValue::Boolean(b), ColumnFormat::Plain) => Value::from(*b),
        _ => Value::String(format_text(value, format)?.unwrap_or_default()),
    })
}

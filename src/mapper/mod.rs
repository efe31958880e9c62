//! Response mapping
//!
//! Applies a request template's field mappings to a decoded response body and
//! produces canonical records. A mapping whose path fans out over an array yields
//! one value per element; fanned-out columns are zipped into rows and
//! single-valued columns are broadcast to every row.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::template::{FieldMapping, RequestTemplate};
use crate::{CanonicalRecord, FieldValue};

pub mod coerce;
pub mod path;

/// Canonical field that overrides the record time when mapped
const TIMESTAMP_FIELD: &str = "timestamp";

/// Mapping errors; any of them discards the whole response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// A required mapping found no value
    #[error("required field '{field}' did not resolve at {path}")]
    Unresolved {
        /// Canonical field
        field: String,
        /// Extraction path (with element index for fanned-out values)
        path: String,
    },

    /// A required mapping's value could not be coerced
    #[error("field '{field}': {reason}")]
    Coercion {
        /// Canonical field
        field: String,
        /// Coercion failure
        reason: String,
    },

    /// Fanned-out mappings produced different numbers of values
    #[error("field '{field}' yielded {found} values, expected {expected}")]
    LengthMismatch {
        /// Canonical field
        field: String,
        /// Row count established by earlier mappings
        expected: usize,
        /// Values produced by this mapping
        found: usize,
    },
}

/// Values of one mapping across all rows
enum Column {
    Broadcast(FieldValue),
    PerRow(Vec<FieldValue>),
}

/// Map a response body into canonical records
///
/// `received_at` becomes the record time unless the template maps `timestamp`.
pub fn map_response(
    template: &RequestTemplate,
    body: &Value,
    received_at: DateTime<Utc>,
) -> Result<Vec<CanonicalRecord>, MappingError> {
    let mut columns = Vec::with_capacity(template.mappings.len());
    let mut rows: Option<usize> = None;

    for mapping in &template.mappings {
        let column = map_column(mapping, body)?;
        if let Column::PerRow(values) = &column {
            match rows {
                None => rows = Some(values.len()),
                Some(expected) if expected != values.len() => {
                    return Err(MappingError::LengthMismatch {
                        field: mapping.field.clone(),
                        expected,
                        found: values.len(),
                    })
                }
                Some(_) => {}
            }
        }
        columns.push((mapping.field.as_str(), column));
    }

    let row_count = rows.unwrap_or(1);
    let mut records = Vec::with_capacity(row_count);
    for row in 0..row_count {
        let mut timestamp = received_at;
        let mut fields = BTreeMap::new();
        for (field, column) in &columns {
            let value = match column {
                Column::Broadcast(value) => value.clone(),
                Column::PerRow(values) => values[row].clone(),
            };
            if *field == TIMESTAMP_FIELD {
                if let FieldValue::Timestamp(ts) = value {
                    timestamp = ts;
                }
                continue;
            }
            fields.insert((*field).to_string(), value);
        }
        records.push(CanonicalRecord::new(
            template.exchange.as_str(),
            template.kind,
            timestamp,
            fields,
        ));
    }

    Ok(records)
}

fn map_column(mapping: &FieldMapping, body: &Value) -> Result<Column, MappingError> {
    let Some(path) = &mapping.path else {
        return coerce_one(mapping, Some(&Value::Null), "constant").map(Column::Broadcast);
    };

    let resolved = path.resolve(body);
    if !resolved.fanned_out {
        return coerce_one(mapping, resolved.single(), path.as_str()).map(Column::Broadcast);
    }

    resolved
        .values
        .iter()
        .enumerate()
        .map(|(i, value)| coerce_one(mapping, *value, &format!("{path}#{i}")))
        .collect::<Result<Vec<_>, _>>()
        .map(Column::PerRow)
}

fn coerce_one(
    mapping: &FieldMapping,
    value: Option<&Value>,
    location: &str,
) -> Result<FieldValue, MappingError> {
    let value = match value {
        Some(v) if !v.is_null() || !mapping.coercion.reads_response() => v,
        _ if mapping.required => {
            return Err(MappingError::Unresolved {
                field: mapping.field.clone(),
                path: location.to_string(),
            })
        }
        _ => return Ok(FieldValue::Absent),
    };

    match mapping.coercion.apply(value) {
        Ok(coerced) => Ok(coerced),
        Err(e) if mapping.required => Err(MappingError::Coercion {
            field: mapping.field.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(FieldValue::Absent),
    }
}

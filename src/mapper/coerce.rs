//! Type coercions applied to extracted values

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::template::schema::FieldType;
use crate::FieldValue;

/// Resolution of an epoch timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Seconds since the epoch
    Seconds,
    /// Milliseconds since the epoch
    Millis,
    /// Microseconds since the epoch
    Micros,
    /// Nanoseconds since the epoch
    Nanos,
}

impl TimeUnit {
    fn per_second(&self) -> i64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Millis => 1_000,
            TimeUnit::Micros => 1_000_000,
            TimeUnit::Nanos => 1_000_000_000,
        }
    }
}

/// Conversion from a raw JSON value to a typed canonical value
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    /// Any scalar rendered as text
    String,
    /// Number or numeric string to decimal
    Number,
    /// Integer or integer string
    Integer,
    /// Bool, `"true"`/`"false"` or 0/1
    Boolean,
    /// Epoch number (or numeric string) in the given unit
    Timestamp(TimeUnit),
    /// RFC 3339 date-time string
    Rfc3339,
    /// Date-time string in a strftime-style pattern
    TimestampFormat(String),
    /// Upper-cased text
    Upper,
    /// Lower-cased text
    Lower,
    /// The `index`-th piece of text split on `separator`
    Split {
        /// Separator
        separator: String,
        /// Zero-based piece index
        index: usize,
    },
    /// Character range `[start, end)` of text
    Slice {
        /// First character
        start: usize,
        /// One past the last character, or the end of text
        end: Option<usize>,
    },
    /// Fixed value, ignoring the response
    Constant(Value),
}

/// Coercion failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoercionError {
    /// Input had a type the coercion cannot consume
    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        /// Accepted input
        expected: &'static str,
        /// JSON type received
        found: &'static str,
    },

    /// Input had the right type but an unusable value
    #[error("invalid value '{value}': {reason}")]
    InvalidValue {
        /// Offending value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

impl Coercion {
    /// Type of the values this coercion produces
    ///
    /// Constants produce the type of their literal; `None` for null or
    /// structured literals.
    pub fn output_type(&self) -> Option<FieldType> {
        match self {
            Coercion::String
            | Coercion::Upper
            | Coercion::Lower
            | Coercion::Split { .. }
            | Coercion::Slice { .. } => Some(FieldType::String),
            Coercion::Number => Some(FieldType::Number),
            Coercion::Integer => Some(FieldType::Integer),
            Coercion::Boolean => Some(FieldType::Boolean),
            Coercion::Timestamp(_) | Coercion::Rfc3339 | Coercion::TimestampFormat(_) => {
                Some(FieldType::Timestamp)
            }
            Coercion::Constant(value) => match value {
                Value::String(_) => Some(FieldType::String),
                Value::Bool(_) => Some(FieldType::Boolean),
                // Integers beyond i64 are stored as decimals
                Value::Number(n) if n.is_i64() => Some(FieldType::Integer),
                Value::Number(_) => Some(FieldType::Number),
                _ => None,
            },
        }
    }

    /// Whether the coercion reads a value from the response
    pub fn reads_response(&self) -> bool {
        !matches!(self, Coercion::Constant(_))
    }

    /// Apply the coercion to an extracted value
    pub fn apply(&self, value: &Value) -> Result<FieldValue, CoercionError> {
        match self {
            Coercion::Constant(literal) => constant(literal),
            Coercion::String => text(value).map(FieldValue::String),
            Coercion::Upper => text(value).map(|s| FieldValue::String(s.to_uppercase())),
            Coercion::Lower => text(value).map(|s| FieldValue::String(s.to_lowercase())),
            Coercion::Split { separator, index } => {
                let s = text(value)?;
                s.split(separator.as_str())
                    .nth(*index)
                    .map(|piece| FieldValue::String(piece.to_string()))
                    .ok_or_else(|| CoercionError::InvalidValue {
                        value: s.clone(),
                        reason: format!("no piece {index} when split on '{separator}'"),
                    })
            }
            Coercion::Slice { start, end } => {
                let s = text(value)?;
                let len = s.chars().count();
                let end = end.unwrap_or(len).min(len);
                if *start > end {
                    return Err(CoercionError::InvalidValue {
                        value: s,
                        reason: format!("slice {start}..{end} out of range"),
                    });
                }
                Ok(FieldValue::String(
                    s.chars().skip(*start).take(end - start).collect(),
                ))
            }
            Coercion::Number => to_decimal(value).map(FieldValue::Number),
            Coercion::Integer => to_integer(value).map(FieldValue::Integer),
            Coercion::Boolean => to_bool(value).map(FieldValue::Boolean),
            Coercion::Timestamp(unit) => to_epoch(value, *unit).map(FieldValue::Timestamp),
            Coercion::Rfc3339 => {
                let s = string_only(value)?;
                DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| FieldValue::Timestamp(dt.with_timezone(&Utc)))
                    .map_err(|e| invalid(s, e))
            }
            Coercion::TimestampFormat(pattern) => {
                let s = string_only(value)?;
                parse_with_pattern(s.trim(), pattern)
                    .map(FieldValue::Timestamp)
                    .ok_or_else(|| CoercionError::InvalidValue {
                        value: s.to_string(),
                        reason: format!("does not match pattern '{pattern}'"),
                    })
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn invalid(value: &str, reason: impl ToString) -> CoercionError {
    CoercionError::InvalidValue {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn text(value: &Value) -> Result<String, CoercionError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(CoercionError::UnexpectedType {
            expected: "scalar",
            found: type_name(other),
        }),
    }
}

fn string_only(value: &Value) -> Result<&str, CoercionError> {
    value.as_str().ok_or(CoercionError::UnexpectedType {
        expected: "string",
        found: type_name(value),
    })
}

fn parse_decimal(s: &str) -> Result<Decimal, CoercionError> {
    let trimmed = s.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| invalid(s, e))
}

fn to_decimal(value: &Value) -> Result<Decimal, CoercionError> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        other => Err(CoercionError::UnexpectedType {
            expected: "number or numeric string",
            found: type_name(other),
        }),
    }
}

fn to_integer(value: &Value) -> Result<i64, CoercionError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid(&n.to_string(), "not a 64-bit integer")),
        Value::String(s) => s.trim().parse::<i64>().map_err(|e| invalid(s, e)),
        other => Err(CoercionError::UnexpectedType {
            expected: "integer or integer string",
            found: type_name(other),
        }),
    }
}

fn to_bool(value: &Value) -> Result<bool, CoercionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(invalid(s, "expected 'true' or 'false'")),
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid(&n.to_string(), "expected 0 or 1")),
        },
        other => Err(CoercionError::UnexpectedType {
            expected: "boolean",
            found: type_name(other),
        }),
    }
}

fn to_epoch(value: &Value, unit: TimeUnit) -> Result<DateTime<Utc>, CoercionError> {
    let out_of_range = |raw: String| invalid(&raw, "timestamp out of range");
    let per_second = unit.per_second();

    let integral = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if let Some(v) = integral {
        let secs = v.div_euclid(per_second);
        let nanos = v.rem_euclid(per_second) * (1_000_000_000 / per_second);
        return DateTime::from_timestamp(secs, nanos as u32).ok_or_else(|| out_of_range(v.to_string()));
    }

    let fractional = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => {
            return Err(CoercionError::UnexpectedType {
                expected: "epoch number or numeric string",
                found: type_name(other),
            })
        }
    };
    let raw = value.to_string();
    let v = fractional
        .filter(|f| f.is_finite())
        .ok_or_else(|| invalid(&raw, "not a number"))?;
    let seconds = v / per_second as f64;
    if seconds.abs() > i64::MAX as f64 / 2.0 {
        return Err(out_of_range(raw));
    }
    // Float epochs carry no more than microsecond precision
    let mut secs = seconds.floor() as i64;
    let mut micros = ((seconds - seconds.floor()) * 1e6).round() as u32;
    if micros >= 1_000_000 {
        secs += 1;
        micros = 0;
    }
    DateTime::from_timestamp(secs, micros * 1_000).ok_or_else(|| out_of_range(raw))
}

fn parse_with_pattern(s: &str, pattern: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(s, pattern) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, pattern) {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, pattern)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn constant(literal: &Value) -> Result<FieldValue, CoercionError> {
    match literal {
        Value::String(s) => Ok(FieldValue::String(s.clone())),
        Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(FieldValue::Integer(i)),
            None => to_decimal(literal).map(FieldValue::Number),
        },
        other => Err(CoercionError::UnexpectedType {
            expected: "scalar constant",
            found: type_name(other),
        }),
    }
}

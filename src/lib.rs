//! # Template Collector Library
//!
//! A template-driven engine for collecting market data (trades, order book
//! snapshots, tickers) from cryptocurrency exchange REST APIs whose
//! authentication, pagination, rate limits and response shapes all differ.
//!
//! ## Features
//!
//! - **Declarative Templates**: request templates describe how to call an endpoint
//!   and how to map its response; export templates describe how collected data is
//!   serialized
//! - **Strict Validation**: templates are checked against a versioned schema and
//!   rejected wholesale with every error reported in one pass
//! - **Rate Limiting**: per-exchange token buckets with an optional global cap on
//!   in-flight requests
//! - **Pagination**: cursor, offset and page-number policies with guaranteed termination
//! - **Concurrent Collection**: one independent loop per exchange with an explicit
//!   backoff state machine and graceful cancellation
//! - **Deduplication**: deterministic dedup keys make re-ingestion idempotent
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use template_collector::collector::{CollectionJob, CollectorOptions, LogReporter, Scheduler};
//! use template_collector::fetcher::{auth::Credentials, http::ReqwestTransport};
//! use template_collector::sink::MemorySink;
//! use template_collector::template::validator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let template = validator::validate_request(&json!({
//!     "exchange": "binance",
//!     "kind": "trade",
//!     "endpoint": "https://api.binance.com/api/v3/trades",
//!     "parameters": [{"name": "symbol", "location": "query", "type": "string", "required": true}],
//!     "rate_limit": {"requests": 10, "window_ms": 1000},
//!     "mappings": [
//!         {"field": "id", "path": "$[*].id", "type": "string"},
//!         {"field": "price", "path": "$[*].price", "type": "number"},
//!         {"field": "amount", "path": "$[*].qty", "type": "number"},
//!         {"field": "timestamp", "path": "$[*].time", "type": "timestamp_ms"}
//!     ]
//! }))?;
//!
//! let bindings = json!({"symbol": "BTCUSDT"});
//! let job = CollectionJob::new(template, bindings.as_object().cloned().unwrap_or_default(), Credentials::none())?;
//!
//! let sink = Arc::new(MemorySink::new());
//! let scheduler = Scheduler::new(
//!     Arc::new(ReqwestTransport::new()?),
//!     sink.clone(),
//!     Arc::new(LogReporter),
//!     CollectorOptions::default().run_once(),
//! );
//! let summaries = scheduler.start(vec![job])?.join().await;
//! # let _ = summaries;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`template`] - Template model, canonical schema and validator
//! - [`fetcher`] - HTTP transport, request building, pagination and failure classification
//! - [`mapper`] - Path extraction and type coercion into canonical records
//! - [`collector`] - Rate limiter, per-exchange collection loops and scheduler
//! - [`sink`] - Append-only record storage with deduplication
//! - [`output`] - Export engine producing delimited text or JSON lines

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use template::schema::FieldType;

/// CLI command implementations
pub mod cli;

/// Collection loops, rate limiting and scheduling
pub mod collector;

/// HTTP transport, request execution and pagination
pub mod fetcher;

/// Response mapping into canonical records
pub mod mapper;

/// Prometheus metrics
pub mod metrics;

/// Export engine and writers
pub mod output;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Record storage
pub mod sink;

/// Template model and validation
pub mod template;

/// Kind of market data a template collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Individual executed trade
    Trade,
    /// Order book snapshot (one record per price level)
    OrderBookSnapshot,
    /// 24h ticker
    Ticker,
}

impl RecordKind {
    /// Canonical string form used in templates and dedup keys
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Trade => "trade",
            RecordKind::OrderBookSnapshot => "order_book_snapshot",
            RecordKind::Ticker => "ticker",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trade" => Ok(RecordKind::Trade),
            "order_book_snapshot" => Ok(RecordKind::OrderBookSnapshot),
            "ticker" => Ok(RecordKind::Ticker),
            _ => Err(format!("Invalid record kind: {s}")),
        }
    }
}

/// Typed value of a canonical field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Text
    String(String),
    /// Decimal number (prices, amounts)
    Number(Decimal),
    /// Integer
    Integer(i64),
    /// Boolean flag
    Boolean(bool),
    /// UTC timestamp
    Timestamp(DateTime<Utc>),
    /// Explicit marker for an optional mapping that did not resolve
    Absent,
}

impl FieldValue {
    /// Whether this is the absent marker
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    /// Schema type of the value, `None` for [`FieldValue::Absent`]
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            FieldValue::String(_) => Some(FieldType::String),
            FieldValue::Number(_) => Some(FieldType::Number),
            FieldValue::Integer(_) => Some(FieldType::Integer),
            FieldValue::Boolean(_) => Some(FieldType::Boolean),
            FieldValue::Timestamp(_) => Some(FieldType::Timestamp),
            FieldValue::Absent => None,
        }
    }

    /// Numeric view of the value (integers widen to decimals)
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(d) => Some(*d),
            FieldValue::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    /// Plain text rendering; `None` for the absent marker
    ///
    /// Decimals are normalized so `1.50` and `1.5` render identically.
    pub fn render(&self) -> Option<String> {
        match self {
            FieldValue::String(s) => Some(s.clone()),
            FieldValue::Number(d) => Some(d.normalize().to_string()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Boolean(b) => Some(b.to_string()),
            FieldValue::Timestamp(t) => Some(t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            FieldValue::Absent => None,
        }
    }

    /// Compare two values of compatible types
    ///
    /// Integers and decimals compare numerically. Returns `None` when either side
    /// is absent or the types cannot be compared.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::String(a), FieldValue::String(b)) => Some(a.cmp(b)),
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => Some(a.cmp(b)),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => Some(a.cmp(b)),
            (FieldValue::Integer(a), FieldValue::Integer(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => None,
            },
        }
    }
}

/// One normalized, schema-conformant data point
///
/// Records are immutable once created; the dedup key is computed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    exchange: String,
    kind: RecordKind,
    timestamp: DateTime<Utc>,
    fields: BTreeMap<String, FieldValue>,
    dedup_key: String,
}

impl CanonicalRecord {
    /// Create a record and derive its dedup key
    ///
    /// The key hashes exchange and kind together with the native `id` field (and
    /// the `symbol` it belongs to, when mapped) if present, otherwise with a
    /// composite of timestamp, symbol, side, position, price and amount.
    pub fn new(
        exchange: impl Into<String>,
        kind: RecordKind,
        timestamp: DateTime<Utc>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        let exchange = exchange.into();
        let dedup_key = compute_dedup_key(&exchange, kind, timestamp, &fields);
        Self {
            exchange,
            kind,
            timestamp,
            fields,
            dedup_key,
        }
    }

    /// Fill `name` with `value` unless the record already carries a value for it
    ///
    /// The dedup key is derived again from the completed fields.
    pub fn with_default_field(self, name: &str, value: FieldValue) -> Self {
        if self.fields.get(name).is_some_and(|v| !v.is_absent()) {
            return self;
        }
        let mut fields = self.fields;
        fields.insert(name.to_string(), value);
        Self::new(self.exchange, self.kind, self.timestamp, fields)
    }

    /// Exchange identifier
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Record kind
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Record timestamp (UTC)
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Deduplication key (hex SHA-256)
    pub fn dedup_key(&self) -> &str {
        &self.dedup_key
    }

    /// Mapped data fields
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Data field by name, without metadata
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Value of any canonical field, metadata included
    ///
    /// Unknown or unmapped fields yield [`FieldValue::Absent`].
    pub fn value(&self, name: &str) -> FieldValue {
        match name {
            "exchange" => FieldValue::String(self.exchange.clone()),
            "kind" => FieldValue::String(self.kind.as_str().to_string()),
            "timestamp" => FieldValue::Timestamp(self.timestamp),
            "dedup_key" => FieldValue::String(self.dedup_key.clone()),
            other => self.fields.get(other).cloned().unwrap_or(FieldValue::Absent),
        }
    }
}

const KEY_SEPARATOR: &[u8] = b"\x1f";

fn compute_dedup_key(
    exchange: &str,
    kind: RecordKind,
    timestamp: DateTime<Utc>,
    fields: &BTreeMap<String, FieldValue>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(exchange.as_bytes());
    hasher.update(KEY_SEPARATOR);
    hasher.update(kind.as_str().as_bytes());
    hasher.update(KEY_SEPARATOR);

    match fields.get("id").and_then(FieldValue::render) {
        Some(id) => {
            hasher.update(b"id:");
            if let Some(symbol) = fields.get("symbol").and_then(FieldValue::render) {
                hasher.update(symbol.as_bytes());
                hasher.update(KEY_SEPARATOR);
            }
            hasher.update(id.as_bytes());
        }
        None => {
            hasher.update(b"ts:");
            hasher.update(timestamp.timestamp_millis().to_string().as_bytes());
            for name in ["symbol", "side", "position", "price", "amount"] {
                hasher.update(KEY_SEPARATOR);
                if let Some(rendered) = fields.get(name).and_then(FieldValue::render) {
                    hasher.update(rendered.as_bytes());
                }
            }
        }
    }

    hex::encode(hasher.finalize())
}

//! Template model
//!
//! In-memory representation of validated request and export templates. Values of
//! these types are produced by [`validator`]; raw documents never reach the
//! collection engine directly.
//!
//! # Request templates
//!
//! A [`RequestTemplate`] describes one endpoint of one exchange: how to build the
//! HTTP call ([`Parameter`], [`AuthSpec`]), how to walk its pages
//! ([`PaginationPolicy`]), how fast it may be called ([`RateLimitSpec`]) and how
//! to turn its response into canonical records ([`FieldMapping`]).
//!
//! # Export templates
//!
//! An [`ExportTemplate`] selects, filters, orders and formats collected records
//! for serialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::mapper::coerce::Coercion;
use crate::mapper::path::JsonPath;
use crate::{FieldValue, RecordKind};

pub mod schema;
pub mod validator;

pub use validator::{ValidationError, ValidationErrorKind, ValidationErrors};

/// HTTP method of a request template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Where a parameter is placed in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLocation {
    /// Query string
    Query,
    /// HTTP header
    Header,
    /// JSON body member
    Body,
    /// `{name}` placeholder in the endpoint
    Path,
}

/// Declared type of a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Text
    String,
    /// Integer
    Integer,
    /// Any number
    Number,
    /// Boolean
    Boolean,
}

impl ParamType {
    /// Name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    /// Whether a JSON value conforms to this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

/// Request parameter declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Placement
    pub location: ParamLocation,
    /// Value type
    pub param_type: ParamType,
    /// Must be bound or defaulted before collection starts
    pub required: bool,
    /// Value used when the job supplies none
    pub default: Option<Value>,
}

/// Default bound on pages fetched in one collection cycle
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

/// Cursor pagination settings
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPagination {
    /// Where the next cursor is found in a response
    pub cursor_path: JsonPath,
    /// Query parameter carrying the cursor on follow-up requests
    pub cursor_param: String,
    /// Cursor value that signals the last page
    pub end_marker: Option<String>,
    /// Requested page size
    pub page_size: Option<u32>,
    /// Query parameter carrying the page size
    pub size_param: Option<String>,
}

/// Offset pagination settings
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetPagination {
    /// Query parameter carrying the offset
    pub offset_param: String,
    /// Query parameter carrying the page size
    pub limit_param: String,
    /// Requested page size
    pub page_size: u32,
    /// Items counted to detect a short page
    pub items_path: JsonPath,
    /// Total item count reported by the API
    pub total_path: Option<JsonPath>,
}

/// Page-number pagination settings
#[derive(Debug, Clone, PartialEq)]
pub struct PageNumberPagination {
    /// Query parameter carrying the page number
    pub page_param: String,
    /// Query parameter carrying the page size
    pub size_param: String,
    /// Requested page size
    pub page_size: u32,
    /// Number of the first page
    pub first_page: u64,
    /// Items counted to detect a short page
    pub items_path: JsonPath,
    /// Total item count reported by the API
    pub total_path: Option<JsonPath>,
}

/// Pagination policy (tagged variant)
#[derive(Debug, Clone, PartialEq)]
pub enum PaginationPolicy {
    /// Single request per cycle
    None,
    /// Opaque cursor taken from each response
    Cursor(CursorPagination),
    /// Item offset advanced by page size
    Offset(OffsetPagination),
    /// Page counter
    PageNumber(PageNumberPagination),
}

impl PaginationPolicy {
    /// Query parameters the policy sends, keyed by their template member
    pub fn query_params(&self) -> Vec<(&'static str, &str)> {
        match self {
            PaginationPolicy::None => Vec::new(),
            PaginationPolicy::Cursor(c) => {
                let mut params = vec![("cursor_param", c.cursor_param.as_str())];
                if let (Some(size_param), Some(_)) = (&c.size_param, c.page_size) {
                    params.push(("size_param", size_param.as_str()));
                }
                params
            }
            PaginationPolicy::Offset(o) => vec![
                ("offset_param", o.offset_param.as_str()),
                ("limit_param", o.limit_param.as_str()),
            ],
            PaginationPolicy::PageNumber(p) => vec![
                ("page_param", p.page_param.as_str()),
                ("size_param", p.size_param.as_str()),
            ],
        }
    }
}

/// Pagination policy with its per-cycle page bound
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    /// Policy
    pub policy: PaginationPolicy,
    /// Maximum pages fetched in one cycle
    pub max_pages: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            policy: PaginationPolicy::None,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// Rate limit of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSpec {
    /// Requests allowed per window
    pub requests: u32,
    /// Window length (always > 0)
    pub window: Duration,
    /// Requests that may be issued back to back
    pub burst: u32,
}

impl RateLimitSpec {
    /// Minimum spacing between requests once the burst is spent
    pub fn min_interval(&self) -> Duration {
        self.window / self.requests.max(1)
    }
}

/// Response field mapping
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    /// Canonical field name
    pub field: String,
    /// Extraction path (absent for constants)
    pub path: Option<JsonPath>,
    /// Coercion applied to the extracted value
    pub coercion: Coercion,
    /// Failing a required mapping discards the whole response
    pub required: bool,
}

/// Where a credential or signature is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLocation {
    /// HTTP header
    Header,
    /// Query string
    Query,
}

/// Authentication spec (tagged variant)
#[derive(Debug, Clone, PartialEq)]
pub enum AuthSpec {
    /// Public endpoint
    None,
    /// API key sent verbatim
    ApiKey {
        /// Placement of the key
        location: KeyLocation,
        /// Header or query parameter name
        name: String,
    },
    /// API key plus HMAC-SHA256 signature of the query string and body
    Signed {
        /// Placement of the key
        key_location: KeyLocation,
        /// Header or query parameter name of the key
        key_name: String,
        /// Placement of the signature
        signature_location: KeyLocation,
        /// Header or query parameter name of the signature
        signature_name: String,
        /// Query parameter carrying the request time in milliseconds
        timestamp_param: Option<String>,
    },
}

impl AuthSpec {
    /// Whether collection needs an API key
    pub fn needs_key(&self) -> bool {
        !matches!(self, AuthSpec::None)
    }

    /// Whether collection needs a signing secret
    pub fn needs_secret(&self) -> bool {
        matches!(self, AuthSpec::Signed { .. })
    }
}

/// Base and quote currency of a market, written `BTC-USD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyPair {
    /// Base currency
    pub first: String,
    /// Quote currency
    pub second: String,
}

impl CurrencyPair {
    /// Create a pair from its two currencies
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

impl FromStr for CurrencyPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('-').map(str::trim).collect::<Vec<_>>().as_slice() {
            [first, second] if !first.is_empty() && !second.is_empty() => {
                Ok(CurrencyPair::new(*first, *second))
            }
            _ => Err(format!("Invalid currency pair '{s}', expected FIRST-SECOND")),
        }
    }
}

impl TryFrom<String> for CurrencyPair {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrencyPair> for String {
    fn from(pair: CurrencyPair) -> Self {
        pair.to_string()
    }
}

/// How a currency pair is written into a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairFormat {
    /// Pattern with `{first}` and `{second}` placeholders, e.g. `{first}_{second}`
    pub pattern: String,
    /// Lower-case the formatted pair
    pub lower_case: bool,
    /// Declared string parameter that receives the formatted pair
    pub parameter: String,
}

impl PairFormat {
    /// Exchange-specific spelling of `pair`
    pub fn format(&self, pair: &CurrencyPair) -> String {
        let formatted = self
            .pattern
            .replace("{first}", &pair.first)
            .replace("{second}", &pair.second);
        if self.lower_case {
            formatted.to_lowercase()
        } else {
            formatted
        }
    }
}

/// Validated request template
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    /// Exchange identifier
    pub exchange: String,
    /// Kind of record produced
    pub kind: RecordKind,
    /// Endpoint URL, possibly with `{name}` placeholders
    pub endpoint: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Declared parameters
    pub parameters: Vec<Parameter>,
    /// Pagination policy
    pub pagination: Pagination,
    /// Rate limit
    pub rate_limit: RateLimitSpec,
    /// Ordered field mappings
    pub mappings: Vec<FieldMapping>,
    /// Authentication
    pub auth: AuthSpec,
    /// Declared response skeleton, if any
    pub response_shape: Option<Value>,
    /// Overrides the runtime poll interval
    pub poll_interval: Option<Duration>,
    /// Overrides the runtime request timeout
    pub timeout: Option<Duration>,
    /// Currency pair spelling for jobs that collect several pairs
    pub pair_format: Option<PairFormat>,
}

/// Serialization format of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Delimited text (CSV-like)
    DelimitedText {
        /// Field delimiter byte
        delimiter: u8,
    },
    /// One JSON object per line
    JsonLines,
}

/// Per-column formatting rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnFormat {
    /// Natural rendering
    Plain,
    /// Fixed number of decimal places
    Decimal(u32),
    /// Epoch milliseconds
    TimestampMillis,
    /// Epoch seconds
    TimestampSeconds,
    /// RFC 3339 with millisecond precision
    Rfc3339,
    /// strftime-style pattern
    TimestampPattern(String),
    /// Upper-cased text
    Upper,
    /// Lower-cased text
    Lower,
}

/// Output column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportColumn {
    /// Canonical field name
    pub field: String,
    /// Output header
    pub header: String,
    /// Formatting rule
    pub format: ColumnFormat,
}

/// Comparison operator of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Greater than
    Gt,
    /// Greater or equal
    Ge,
    /// Less than
    Lt,
    /// Less or equal
    Le,
}

/// Filter predicate over canonical records
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Compare one field with a literal
    Compare {
        /// Canonical field name
        field: String,
        /// Operator
        op: CompareOp,
        /// Literal, already coerced to the field's type
        value: FieldValue,
    },
    /// Every sub-filter matches
    All(Vec<Filter>),
    /// At least one sub-filter matches
    Any(Vec<Filter>),
    /// Sub-filter does not match
    Not(Box<Filter>),
}

impl Filter {
    /// Canonical fields the filter reads
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Filter::Compare { field, .. } => vec![field.as_str()],
            Filter::All(filters) | Filter::Any(filters) => {
                filters.iter().flat_map(Filter::fields).collect()
            }
            Filter::Not(inner) => inner.fields(),
        }
    }
}

/// Export ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    /// Canonical field name
    pub field: String,
    /// Largest first
    pub descending: bool,
}

/// Validated export template
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTemplate {
    /// Output format
    pub format: ExportFormat,
    /// Columns in output order
    pub columns: Vec<ExportColumn>,
    /// Optional filter
    pub filter: Option<Filter>,
    /// Optional ordering key
    pub order_by: Option<OrderKey>,
    /// Emit a header line (delimited text only)
    pub include_header: bool,
    /// Text written for absent values
    pub null_value: String,
}

/// Which schema a raw document is validated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Request template
    Request,
    /// Export template
    Export,
}

/// Either kind of validated template
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    /// Request template
    Request(RequestTemplate),
    /// Export template
    Export(ExportTemplate),
}

//! Template validation
//!
//! Turns a raw template document into a [`RequestTemplate`] or [`ExportTemplate`],
//! or into the complete ordered list of problems found. Checks run in four
//! passes and errors are reported in pass order:
//!
//! 1. presence of every required top-level field
//! 2. type conformance of each field; a mismatch inside a sub-document stops
//!    the checks of that sub-document, sibling fields keep being checked
//! 3. cross-field constraints (pagination requirements, path placeholders,
//!    mapping targets against the canonical schema, ...)
//! 4. uniqueness of parameter names, mapping targets and export headers
//!
//! Unknown keys are rejected everywhere. Validation is a pure function of the
//! document and [`SCHEMA_VERSION`].

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use super::schema::{self, FieldType, SCHEMA_VERSION};
use super::*;
use crate::mapper::coerce::{Coercion, TimeUnit};
use crate::mapper::path::JsonPath;
use crate::{FieldValue, RecordKind};

/// Upper bound on a template's request timeout
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// What is wrong with a field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationErrorKind {
    /// Required field not present
    #[error("required field is missing")]
    Missing,

    /// Field has the wrong JSON type
    #[error("expected {expected}, found {found}")]
    WrongType {
        /// Expected type
        expected: &'static str,
        /// Type found
        found: &'static str,
    },

    /// Field has the right type but an unusable value
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Field conflicts with another field or with the canonical schema
    #[error("{0}")]
    Constraint(String),

    /// Value repeats an earlier one that must be unique
    #[error("duplicate {0}")]
    Duplicate(String),

    /// Key not part of the schema
    #[error("unknown field")]
    UnknownField,
}

/// A single validation problem, located by dotted path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {kind}")]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. `mappings[2].path`)
    pub path: String,
    /// Problem
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    /// Create an error
    pub fn new(path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Non-empty ordered list of validation problems
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    /// Wrap a list of errors
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self(errors)
    }

    /// Errors in report order
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    /// Number of errors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any error is located at `path`
    pub fn has_path(&self, path: &str) -> bool {
        self.0.iter().any(|e| e.path == path)
    }

    /// Unwrap into the underlying list
    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validate a document against the schema of the given kind
pub fn validate(kind: TemplateKind, document: &Value) -> Result<Template, ValidationErrors> {
    match kind {
        TemplateKind::Request => validate_request(document).map(Template::Request),
        TemplateKind::Export => validate_export(document).map(Template::Export),
    }
}

type Check<T> = Result<T, ValidationError>;

const ROOT: &str = "$";

const REQUEST_REQUIRED: &[&str] = &["exchange", "kind", "endpoint", "rate_limit", "mappings"];
const REQUEST_OPTIONAL: &[&str] = &[
    "method",
    "parameters",
    "pagination",
    "auth",
    "response_shape",
    "poll_interval_ms",
    "timeout_ms",
    "pair_format",
    "schema_version",
];

/// Validate a raw request template
pub fn validate_request(document: &Value) -> Result<RequestTemplate, ValidationErrors> {
    let map = document
        .as_object()
        .ok_or_else(|| ValidationErrors::new(vec![wrong_type(ROOT, "object", document)]))?;
    let mut errors = Vec::new();

    // (a) required top-level fields
    for key in REQUEST_REQUIRED {
        if !map.contains_key(*key) {
            errors.push(ValidationError::new(*key, ValidationErrorKind::Missing));
        }
    }

    // (b) types, sub-document by sub-document
    report_unknown_keys(map, REQUEST_REQUIRED, REQUEST_OPTIONAL, "", &mut errors);

    let exchange = field(map, "exchange", &mut errors, non_empty_string);
    let kind = field(map, "kind", &mut errors, |v, p| {
        enum_value(v, p, &[
            ("trade", RecordKind::Trade),
            ("order_book_snapshot", RecordKind::OrderBookSnapshot),
            ("ticker", RecordKind::Ticker),
        ])
    });
    let endpoint = field(map, "endpoint", &mut errors, parse_endpoint);
    let method = match map.get("method") {
        Some(v) => collect(&mut errors, parse_method(v, "method")),
        None => Some(HttpMethod::Get),
    };
    let parameters = match map.get("parameters") {
        Some(v) => parse_list(v, "parameters", &mut errors, parse_parameter),
        None => Some(Vec::new()),
    };
    let pagination = match map.get("pagination") {
        Some(v) => collect(&mut errors, parse_pagination(v, "pagination")),
        None => Some(PaginationDraft::none()),
    };
    let rate_limit = field(map, "rate_limit", &mut errors, parse_rate_limit);
    let mappings = match map.get("mappings") {
        Some(v) => {
            let parsed = parse_list(v, "mappings", &mut errors, parse_mapping);
            if matches!(&parsed, Some(list) if list.is_empty()) {
                errors.push(invalid("mappings", "at least one mapping is required"));
                None
            } else {
                parsed
            }
        }
        None => None,
    };
    let auth = match map.get("auth") {
        Some(v) => collect(&mut errors, parse_auth(v, "auth")),
        None => Some(AuthSpec::None),
    };
    let response_shape = map.get("response_shape").cloned();
    let poll_interval = field(map, "poll_interval_ms", &mut errors, |v, p| {
        positive(v, p).map(Duration::from_millis)
    });
    let timeout = field(map, "timeout_ms", &mut errors, |v, p| {
        let ms = positive(v, p)?;
        if ms > MAX_TIMEOUT_MS {
            return Err(invalid(p, &format!("must not exceed {MAX_TIMEOUT_MS} ms")));
        }
        Ok(Duration::from_millis(ms))
    });
    let pair_format = field(map, "pair_format", &mut errors, parse_pair_format);
    if let Some(v) = map.get("schema_version") {
        collect(&mut errors, check_schema_version(v, "schema_version"));
    }

    // (c) cross-field constraints
    let pagination = pagination.and_then(|draft| collect_all(&mut errors, draft.finish("pagination")));

    if let (Some(pair_format), Some(parameters)) = (&pair_format, &parameters) {
        check_pair_parameter(pair_format, parameters, &mut errors);
    }

    if let (Some(endpoint), Some(parameters)) = (&endpoint, &parameters) {
        check_placeholders(endpoint, parameters, &mut errors);
    }
    if let (Some(method), Some(parameters)) = (method, &parameters) {
        if method == HttpMethod::Get {
            for (i, p) in parameters.iter().enumerate() {
                if p.location == ParamLocation::Body {
                    errors.push(constraint(
                        &format!("parameters[{i}].location"),
                        "body parameters are not allowed with GET",
                    ));
                }
            }
        }
    }
    if let Some(mappings) = &mappings {
        check_mappings(mappings, response_shape.as_ref(), &mut errors);
    }

    // (d) uniqueness
    if let Some(parameters) = &parameters {
        check_unique(
            parameters.iter().map(|p| p.name.as_str()),
            "parameters",
            "name",
            "parameter name",
            &mut errors,
        );
    }
    if let Some(mappings) = &mappings {
        check_unique(
            mappings.iter().map(|m| m.field.as_str()),
            "mappings",
            "field",
            "mapping target",
            &mut errors,
        );
    }
    if let (Some(pagination), Some(parameters)) = (&pagination, &parameters) {
        check_pagination_params(&pagination.policy, parameters, &mut errors);
    }

    if !errors.is_empty() {
        return Err(ValidationErrors::new(errors));
    }

    match (
        exchange,
        kind,
        endpoint,
        method,
        parameters,
        pagination,
        rate_limit,
        mappings,
        auth,
    ) {
        (
            Some(exchange),
            Some(kind),
            Some(endpoint),
            Some(method),
            Some(parameters),
            Some(pagination),
            Some(rate_limit),
            Some(mappings),
            Some(auth),
        ) => Ok(RequestTemplate {
            exchange,
            kind,
            endpoint,
            method,
            parameters,
            pagination,
            rate_limit,
            mappings,
            auth,
            response_shape,
            poll_interval,
            timeout,
            pair_format,
        }),
        _ => Err(ValidationErrors::new(vec![ValidationError::new(
            ROOT,
            ValidationErrorKind::Constraint("template is incomplete".to_string()),
        )])),
    }
}

const EXPORT_REQUIRED: &[&str] = &["format", "columns"];
const EXPORT_OPTIONAL: &[&str] = &[
    "delimiter",
    "include_header",
    "null_value",
    "filter",
    "order_by",
    "schema_version",
];

/// Validate a raw export template
pub fn validate_export(document: &Value) -> Result<ExportTemplate, ValidationErrors> {
    let map = document
        .as_object()
        .ok_or_else(|| ValidationErrors::new(vec![wrong_type(ROOT, "object", document)]))?;
    let mut errors = Vec::new();

    for key in EXPORT_REQUIRED {
        if !map.contains_key(*key) {
            errors.push(ValidationError::new(*key, ValidationErrorKind::Missing));
        }
    }

    report_unknown_keys(map, EXPORT_REQUIRED, EXPORT_OPTIONAL, "", &mut errors);

    let format = field(map, "format", &mut errors, |v, p| {
        enum_value(v, p, &[("delimited_text", true), ("json_lines", false)])
    });
    let delimiter = field(map, "delimiter", &mut errors, parse_delimiter);
    let columns = match map.get("columns") {
        Some(v) => {
            let parsed = parse_list(v, "columns", &mut errors, parse_column);
            if matches!(&parsed, Some(list) if list.is_empty()) {
                errors.push(invalid("columns", "at least one column is required"));
                None
            } else {
                parsed
            }
        }
        None => None,
    };
    let include_header = field(map, "include_header", &mut errors, as_bool).unwrap_or(true);
    let null_value = field(map, "null_value", &mut errors, |v, p| {
        as_str(v, p).map(str::to_string)
    })
    .unwrap_or_default();
    let filter = match map.get("filter") {
        Some(v) => collect(&mut errors, parse_filter(v, "filter")).map(Some),
        None => Some(None),
    };
    let order_by = field(map, "order_by", &mut errors, parse_order_key);
    if let Some(v) = map.get("schema_version") {
        collect(&mut errors, check_schema_version(v, "schema_version"));
    }

    // (c) cross-field constraints
    if let Some(columns) = &columns {
        for (i, column) in columns.iter().enumerate() {
            if schema::lookup(&column.field).is_none() {
                errors.push(unknown_canonical(&format!("columns[{i}].field"), &column.field));
            }
        }
    }
    let filter = match filter {
        Some(Some(draft)) => collect_all(&mut errors, draft.finish("filter")).map(Some),
        Some(None) => Some(None),
        None => None,
    };
    if let Some(order) = &order_by {
        if schema::lookup(&order.field).is_none() {
            errors.push(unknown_canonical("order_by.field", &order.field));
        }
    }
    if format == Some(false) && delimiter.is_some() {
        errors.push(constraint("delimiter", "delimiter only applies to delimited_text"));
    }

    // (d) uniqueness
    if let Some(columns) = &columns {
        check_unique(
            columns.iter().map(|c| c.header.as_str()),
            "columns",
            "header",
            "column header",
            &mut errors,
        );
    }

    if !errors.is_empty() {
        return Err(ValidationErrors::new(errors));
    }

    match (format, columns, filter) {
        (Some(delimited), Some(columns), Some(filter)) => Ok(ExportTemplate {
            format: if delimited {
                ExportFormat::DelimitedText {
                    delimiter: delimiter.unwrap_or(b','),
                }
            } else {
                ExportFormat::JsonLines
            },
            columns,
            filter,
            order_by,
            include_header,
            null_value,
        }),
        _ => Err(ValidationErrors::new(vec![ValidationError::new(
            ROOT,
            ValidationErrorKind::Constraint("template is incomplete".to_string()),
        )])),
    }
}

// ---------------------------------------------------------------------------
// Error constructors and primitive checks
// ---------------------------------------------------------------------------

fn at(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn wrong_type(path: &str, expected: &'static str, found: &Value) -> ValidationError {
    ValidationError::new(
        path,
        ValidationErrorKind::WrongType {
            expected,
            found: json_type(found),
        },
    )
}

fn invalid(path: &str, message: &str) -> ValidationError {
    ValidationError::new(path, ValidationErrorKind::InvalidValue(message.to_string()))
}

fn constraint(path: &str, message: &str) -> ValidationError {
    ValidationError::new(path, ValidationErrorKind::Constraint(message.to_string()))
}

fn missing(path: &str) -> ValidationError {
    ValidationError::new(path, ValidationErrorKind::Missing)
}

fn unknown_canonical(path: &str, name: &str) -> ValidationError {
    constraint(path, &format!("'{name}' is not a canonical field"))
}

fn collect<T>(errors: &mut Vec<ValidationError>, result: Check<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            errors.push(e);
            None
        }
    }
}

fn collect_all<T>(errors: &mut Vec<ValidationError>, result: Result<T, Vec<ValidationError>>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(mut list) => {
            errors.append(&mut list);
            None
        }
    }
}

/// Parse a top-level field if present; absence of required ones was already reported
fn field<T>(
    map: &Map<String, Value>,
    key: &str,
    errors: &mut Vec<ValidationError>,
    parse: impl FnOnce(&Value, &str) -> Check<T>,
) -> Option<T> {
    map.get(key).and_then(|v| collect(errors, parse(v, key)))
}

fn report_unknown_keys(
    map: &Map<String, Value>,
    required: &[&str],
    optional: &[&str],
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    for key in map.keys() {
        if !required.contains(&key.as_str()) && !optional.contains(&key.as_str()) {
            errors.push(ValidationError::new(at(path, key), ValidationErrorKind::UnknownField));
        }
    }
}

fn reject_unknown(map: &Map<String, Value>, allowed: &[&str], path: &str) -> Check<()> {
    match map.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(ValidationError::new(at(path, key), ValidationErrorKind::UnknownField)),
        None => Ok(()),
    }
}

fn as_object<'a>(value: &'a Value, path: &str) -> Check<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| wrong_type(path, "object", value))
}

fn as_str<'a>(value: &'a Value, path: &str) -> Check<&'a str> {
    value.as_str().ok_or_else(|| wrong_type(path, "string", value))
}

fn as_bool(value: &Value, path: &str) -> Check<bool> {
    value.as_bool().ok_or_else(|| wrong_type(path, "boolean", value))
}

fn as_u64(value: &Value, path: &str) -> Check<u64> {
    value
        .as_u64()
        .ok_or_else(|| wrong_type(path, "non-negative integer", value))
}

fn positive(value: &Value, path: &str) -> Check<u64> {
    match as_u64(value, path)? {
        0 => Err(invalid(path, "must be greater than zero")),
        n => Ok(n),
    }
}

fn positive_u32(value: &Value, path: &str) -> Check<u32> {
    let n = positive(value, path)?;
    u32::try_from(n).map_err(|_| invalid(path, "value is too large"))
}

fn non_empty_string(value: &Value, path: &str) -> Check<String> {
    let s = as_str(value, path)?;
    if s.trim().is_empty() {
        return Err(invalid(path, "must not be empty"));
    }
    Ok(s.to_string())
}

fn enum_value<T: Copy>(value: &Value, path: &str, options: &[(&str, T)]) -> Check<T> {
    let s = as_str(value, path)?;
    options
        .iter()
        .find(|(name, _)| *name == s)
        .map(|(_, v)| *v)
        .ok_or_else(|| {
            let names: Vec<&str> = options.iter().map(|(n, _)| *n).collect();
            invalid(path, &format!("'{s}' is not one of: {}", names.join(", ")))
        })
}

fn required_key<'a>(map: &'a Map<String, Value>, key: &str, path: &str) -> Check<&'a Value> {
    map.get(key).ok_or_else(|| missing(&at(path, key)))
}

fn optional_key<'a, T>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
    parse: impl FnOnce(&'a Value, &str) -> Check<T>,
) -> Check<Option<T>> {
    map.get(key).map(|v| parse(v, &at(path, key))).transpose()
}

fn parse_path(value: &Value, path: &str) -> Check<JsonPath> {
    let text = as_str(value, path)?;
    JsonPath::parse(text).map_err(|e| invalid(path, &e.to_string()))
}

fn check_schema_version(value: &Value, path: &str) -> Check<()> {
    let version = as_u64(value, path)?;
    if version != SCHEMA_VERSION {
        return Err(invalid(
            path,
            &format!("unsupported schema version {version}, expected {SCHEMA_VERSION}"),
        ));
    }
    Ok(())
}

/// Parse each element of a list; element errors do not stop siblings
fn parse_list<T>(
    value: &Value,
    path: &str,
    errors: &mut Vec<ValidationError>,
    parse: impl Fn(&Value, &str) -> Check<T>,
) -> Option<Vec<T>> {
    let Some(items) = value.as_array() else {
        errors.push(wrong_type(path, "array", value));
        return None;
    };
    let mut parsed = Vec::with_capacity(items.len());
    let mut failed = false;
    for (i, item) in items.iter().enumerate() {
        match parse(item, &format!("{path}[{i}]")) {
            Ok(v) => parsed.push(v),
            Err(e) => {
                errors.push(e);
                failed = true;
            }
        }
    }
    (!failed).then_some(parsed)
}

fn check_unique<'a>(
    names: impl Iterator<Item = &'a str>,
    list: &str,
    member: &str,
    what: &str,
    errors: &mut Vec<ValidationError>,
) {
    let mut seen = HashSet::new();
    for (i, name) in names.enumerate() {
        if !seen.insert(name) {
            errors.push(ValidationError::new(
                format!("{list}[{i}].{member}"),
                ValidationErrorKind::Duplicate(format!("{what} '{name}'")),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Request template parts
// ---------------------------------------------------------------------------

/// Names of `{name}` placeholders in an endpoint
fn placeholders(endpoint: &str) -> Result<Vec<&str>, String> {
    let mut names = Vec::new();
    let mut rest = endpoint;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| "unterminated '{' placeholder".to_string())?;
        let name = &after[..close];
        if name.is_empty() || name.contains('{') {
            return Err("malformed '{name}' placeholder".to_string());
        }
        names.push(name);
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err("unmatched '}'".to_string());
    }
    Ok(names)
}

fn parse_endpoint(value: &Value, path: &str) -> Check<String> {
    let endpoint = non_empty_string(value, path)?;
    let names = placeholders(&endpoint).map_err(|e| invalid(path, &e))?;
    let mut candidate = endpoint.clone();
    for name in names {
        candidate = candidate.replace(&format!("{{{name}}}"), "placeholder");
    }
    let url = url::Url::parse(&candidate).map_err(|e| invalid(path, &format!("not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(path, "URL scheme must be http or https"));
    }
    Ok(endpoint)
}

fn parse_method(value: &Value, path: &str) -> Check<HttpMethod> {
    let s = as_str(value, path)?;
    match s.to_ascii_uppercase().as_str() {
        "GET" => Ok(HttpMethod::Get),
        "POST" => Ok(HttpMethod::Post),
        "PUT" => Ok(HttpMethod::Put),
        "DELETE" => Ok(HttpMethod::Delete),
        _ => Err(invalid(path, &format!("'{s}' is not one of: GET, POST, PUT, DELETE"))),
    }
}

fn parse_parameter(value: &Value, path: &str) -> Check<Parameter> {
    let map = as_object(value, path)?;
    reject_unknown(map, &["name", "location", "type", "required", "default"], path)?;

    let name = non_empty_string(required_key(map, "name", path)?, &at(path, "name"))?;
    let location = enum_value(
        required_key(map, "location", path)?,
        &at(path, "location"),
        &[
            ("query", ParamLocation::Query),
            ("header", ParamLocation::Header),
            ("body", ParamLocation::Body),
            ("path", ParamLocation::Path),
        ],
    )?;
    let param_type = enum_value(
        required_key(map, "type", path)?,
        &at(path, "type"),
        &[
            ("string", ParamType::String),
            ("integer", ParamType::Integer),
            ("number", ParamType::Number),
            ("boolean", ParamType::Boolean),
        ],
    )?;
    let required = optional_key(map, "required", path, as_bool)?.unwrap_or(false);
    let default = match map.get("default") {
        Some(v) if !param_type.accepts(v) => {
            return Err(wrong_type(&at(path, "default"), param_type.as_str(), v))
        }
        other => other.cloned(),
    };

    Ok(Parameter {
        name,
        location,
        param_type,
        required,
        default,
    })
}

fn parse_rate_limit(value: &Value, path: &str) -> Check<RateLimitSpec> {
    let map = as_object(value, path)?;
    reject_unknown(map, &["requests", "window_ms", "burst"], path)?;
    let requests = positive_u32(required_key(map, "requests", path)?, &at(path, "requests"))?;
    let window_ms = positive(required_key(map, "window_ms", path)?, &at(path, "window_ms"))?;
    let burst = optional_key(map, "burst", path, positive_u32)?.unwrap_or(requests);
    Ok(RateLimitSpec {
        requests,
        window: Duration::from_millis(window_ms),
        burst,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaginationKind {
    None,
    Cursor,
    Offset,
    PageNumber,
}

/// Pagination members parsed for type only; required members are checked later
#[derive(Debug)]
struct PaginationDraft {
    kind: PaginationKind,
    max_pages: Option<u32>,
    cursor_path: Option<JsonPath>,
    cursor_param: Option<String>,
    end_marker: Option<String>,
    page_size: Option<u32>,
    size_param: Option<String>,
    offset_param: Option<String>,
    limit_param: Option<String>,
    page_param: Option<String>,
    first_page: Option<u64>,
    items_path: Option<JsonPath>,
    total_path: Option<JsonPath>,
}

impl PaginationDraft {
    fn none() -> Self {
        Self {
            kind: PaginationKind::None,
            max_pages: None,
            cursor_path: None,
            cursor_param: None,
            end_marker: None,
            page_size: None,
            size_param: None,
            offset_param: None,
            limit_param: None,
            page_param: None,
            first_page: None,
            items_path: None,
            total_path: None,
        }
    }

    fn finish(self, path: &str) -> Result<Pagination, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let kind_name = match self.kind {
            PaginationKind::None => "none",
            PaginationKind::Cursor => "cursor",
            PaginationKind::Offset => "offset",
            PaginationKind::PageNumber => "page_number",
        };
        let mut need = |present: bool, key: &str| {
            if !present {
                errors.push(constraint(
                    &at(path, key),
                    &format!("required for {kind_name} pagination"),
                ));
            }
        };

        match self.kind {
            PaginationKind::None => {}
            PaginationKind::Cursor => {
                need(self.cursor_path.is_some(), "cursor_path");
                need(self.cursor_param.is_some(), "cursor_param");
                need(
                    self.page_size.is_none() || self.size_param.is_some(),
                    "size_param",
                );
            }
            PaginationKind::Offset => {
                need(self.offset_param.is_some(), "offset_param");
                need(self.limit_param.is_some(), "limit_param");
                need(self.page_size.is_some(), "page_size");
            }
            PaginationKind::PageNumber => {
                need(self.page_param.is_some(), "page_param");
                need(self.size_param.is_some(), "size_param");
                need(self.page_size.is_some(), "page_size");
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let max_pages = self.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        let items_path = self.items_path.unwrap_or_else(JsonPath::root);
        let policy = match (self.kind, self.page_size) {
            (PaginationKind::None, _) => PaginationPolicy::None,
            (PaginationKind::Cursor, page_size) => match (self.cursor_path, self.cursor_param) {
                (Some(cursor_path), Some(cursor_param)) => PaginationPolicy::Cursor(CursorPagination {
                    cursor_path,
                    cursor_param,
                    end_marker: self.end_marker,
                    page_size,
                    size_param: self.size_param,
                }),
                _ => return Err(vec![constraint(path, "incomplete cursor pagination")]),
            },
            (PaginationKind::Offset, Some(page_size)) => match (self.offset_param, self.limit_param) {
                (Some(offset_param), Some(limit_param)) => PaginationPolicy::Offset(OffsetPagination {
                    offset_param,
                    limit_param,
                    page_size,
                    items_path,
                    total_path: self.total_path,
                }),
                _ => return Err(vec![constraint(path, "incomplete offset pagination")]),
            },
            (PaginationKind::PageNumber, Some(page_size)) => match (self.page_param, self.size_param) {
                (Some(page_param), Some(size_param)) => {
                    PaginationPolicy::PageNumber(PageNumberPagination {
                        page_param,
                        size_param,
                        page_size,
                        first_page: self.first_page.unwrap_or(1),
                        items_path,
                        total_path: self.total_path,
                    })
                }
                _ => return Err(vec![constraint(path, "incomplete page_number pagination")]),
            },
            _ => return Err(vec![constraint(&at(path, "page_size"), "page_size is required")]),
        };
        Ok(Pagination { policy, max_pages })
    }
}

fn parse_pagination(value: &Value, path: &str) -> Check<PaginationDraft> {
    let map = as_object(value, path)?;
    let kind = enum_value(
        required_key(map, "kind", path)?,
        &at(path, "kind"),
        &[
            ("none", PaginationKind::None),
            ("cursor", PaginationKind::Cursor),
            ("offset", PaginationKind::Offset),
            ("page_number", PaginationKind::PageNumber),
        ],
    )?;
    let allowed: &[&str] = match kind {
        PaginationKind::None => &["kind", "max_pages"],
        PaginationKind::Cursor => &[
            "kind",
            "max_pages",
            "cursor_path",
            "cursor_param",
            "end_marker",
            "page_size",
            "size_param",
        ],
        PaginationKind::Offset => &[
            "kind",
            "max_pages",
            "offset_param",
            "limit_param",
            "page_size",
            "items_path",
            "total_path",
        ],
        PaginationKind::PageNumber => &[
            "kind",
            "max_pages",
            "page_param",
            "size_param",
            "page_size",
            "first_page",
            "items_path",
            "total_path",
        ],
    };
    reject_unknown(map, allowed, path)?;

    let name = |v: &Value, p: &str| non_empty_string(v, p);
    let end_marker = optional_key(map, "end_marker", path, |v, p| match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(wrong_type(p, "string or number", other)),
    })?;

    Ok(PaginationDraft {
        kind,
        max_pages: optional_key(map, "max_pages", path, positive_u32)?,
        cursor_path: optional_key(map, "cursor_path", path, parse_path)?,
        cursor_param: optional_key(map, "cursor_param", path, name)?,
        end_marker,
        page_size: optional_key(map, "page_size", path, positive_u32)?,
        size_param: optional_key(map, "size_param", path, name)?,
        offset_param: optional_key(map, "offset_param", path, name)?,
        limit_param: optional_key(map, "limit_param", path, name)?,
        page_param: optional_key(map, "page_param", path, name)?,
        first_page: optional_key(map, "first_page", path, as_u64)?,
        items_path: optional_key(map, "items_path", path, parse_path)?,
        total_path: optional_key(map, "total_path", path, parse_path)?,
    })
}

fn parse_mapping(value: &Value, path: &str) -> Check<FieldMapping> {
    let map = as_object(value, path)?;
    let type_name = as_str(required_key(map, "type", path)?, &at(path, "type"))?;
    let extra: &[&str] = match type_name {
        "timestamp_format" => &["format"],
        "split" => &["separator", "index"],
        "slice" => &["start", "end"],
        "constant" => &["value"],
        _ => &[],
    };
    let allowed: Vec<&str> = ["field", "path", "type", "required"]
        .iter()
        .chain(extra.iter())
        .copied()
        .collect();
    reject_unknown(map, &allowed, path)?;

    let field = non_empty_string(required_key(map, "field", path)?, &at(path, "field"))?;
    let coercion = match type_name {
        "string" => Coercion::String,
        "number" => Coercion::Number,
        "integer" => Coercion::Integer,
        "boolean" => Coercion::Boolean,
        "timestamp_s" => Coercion::Timestamp(TimeUnit::Seconds),
        "timestamp_ms" => Coercion::Timestamp(TimeUnit::Millis),
        "timestamp_us" => Coercion::Timestamp(TimeUnit::Micros),
        "timestamp_ns" => Coercion::Timestamp(TimeUnit::Nanos),
        "timestamp_rfc3339" => Coercion::Rfc3339,
        "timestamp_format" => Coercion::TimestampFormat(non_empty_string(
            required_key(map, "format", path)?,
            &at(path, "format"),
        )?),
        "upper" => Coercion::Upper,
        "lower" => Coercion::Lower,
        "split" => Coercion::Split {
            separator: non_empty_string(required_key(map, "separator", path)?, &at(path, "separator"))?,
            index: as_u64(required_key(map, "index", path)?, &at(path, "index"))? as usize,
        },
        "slice" => Coercion::Slice {
            start: as_u64(required_key(map, "start", path)?, &at(path, "start"))? as usize,
            end: optional_key(map, "end", path, as_u64)?.map(|e| e as usize),
        },
        "constant" => Coercion::Constant(required_key(map, "value", path)?.clone()),
        other => {
            return Err(invalid(
                &at(path, "type"),
                &format!("'{other}' is not a supported coercion"),
            ))
        }
    };
    let mapping_path = optional_key(map, "path", path, parse_path)?;
    let required = optional_key(map, "required", path, as_bool)?.unwrap_or(true);

    Ok(FieldMapping {
        field,
        path: mapping_path,
        coercion,
        required,
    })
}

fn parse_key_location(value: &Value, path: &str) -> Check<KeyLocation> {
    enum_value(
        value,
        path,
        &[("header", KeyLocation::Header), ("query", KeyLocation::Query)],
    )
}

fn parse_auth(value: &Value, path: &str) -> Check<AuthSpec> {
    let map = as_object(value, path)?;
    let kind = as_str(required_key(map, "kind", path)?, &at(path, "kind"))?;
    match kind {
        "none" => {
            reject_unknown(map, &["kind"], path)?;
            Ok(AuthSpec::None)
        }
        "api_key" => {
            reject_unknown(map, &["kind", "location", "name"], path)?;
            Ok(AuthSpec::ApiKey {
                location: parse_key_location(required_key(map, "location", path)?, &at(path, "location"))?,
                name: non_empty_string(required_key(map, "name", path)?, &at(path, "name"))?,
            })
        }
        "signed" => {
            reject_unknown(
                map,
                &[
                    "kind",
                    "key_location",
                    "key_name",
                    "signature_location",
                    "signature_name",
                    "timestamp_param",
                ],
                path,
            )?;
            Ok(AuthSpec::Signed {
                key_location: parse_key_location(
                    required_key(map, "key_location", path)?,
                    &at(path, "key_location"),
                )?,
                key_name: non_empty_string(required_key(map, "key_name", path)?, &at(path, "key_name"))?,
                signature_location: parse_key_location(
                    required_key(map, "signature_location", path)?,
                    &at(path, "signature_location"),
                )?,
                signature_name: non_empty_string(
                    required_key(map, "signature_name", path)?,
                    &at(path, "signature_name"),
                )?,
                timestamp_param: optional_key(map, "timestamp_param", path, non_empty_string)?,
            })
        }
        other => Err(invalid(
            &at(path, "kind"),
            &format!("'{other}' is not one of: none, api_key, signed"),
        )),
    }
}

fn parse_pair_format(value: &Value, path: &str) -> Check<PairFormat> {
    let map = as_object(value, path)?;
    reject_unknown(map, &["template", "lower_case", "parameter"], path)?;

    let pattern_path = at(path, "template");
    let pattern = non_empty_string(required_key(map, "template", path)?, &pattern_path)?;
    let names = placeholders(&pattern).map_err(|e| invalid(&pattern_path, &e))?;
    for expected in ["first", "second"] {
        if !names.contains(&expected) {
            return Err(invalid(
                &pattern_path,
                &format!("missing '{{{expected}}}' placeholder"),
            ));
        }
    }
    if let Some(other) = names.iter().find(|n| !matches!(**n, "first" | "second")) {
        return Err(invalid(&pattern_path, &format!("unknown placeholder '{{{other}}}'")));
    }

    let parameter = non_empty_string(required_key(map, "parameter", path)?, &at(path, "parameter"))?;
    let lower_case = optional_key(map, "lower_case", path, as_bool)?.unwrap_or(false);
    Ok(PairFormat {
        pattern,
        lower_case,
        parameter,
    })
}

/// The formatted pair is bound to a declared string parameter
fn check_pair_parameter(pair_format: &PairFormat, parameters: &[Parameter], errors: &mut Vec<ValidationError>) {
    let path = "pair_format.parameter";
    match parameters.iter().find(|p| p.name == pair_format.parameter) {
        None => errors.push(constraint(
            path,
            &format!("'{}' is not a declared parameter", pair_format.parameter),
        )),
        Some(p) if p.param_type != ParamType::String => errors.push(constraint(
            path,
            &format!("parameter '{}' must have type string", p.name),
        )),
        Some(_) => {}
    }
}

/// Pagination must not send a query key twice
fn check_pagination_params(policy: &PaginationPolicy, parameters: &[Parameter], errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = parameters
        .iter()
        .filter(|p| p.location == ParamLocation::Query)
        .map(|p| p.name.as_str())
        .collect();
    for (member, name) in policy.query_params() {
        if !seen.insert(name) {
            errors.push(ValidationError::new(
                at("pagination", member),
                ValidationErrorKind::Duplicate(format!("query parameter '{name}'")),
            ));
        }
    }
}

fn check_placeholders(endpoint: &str, parameters: &[Parameter], errors: &mut Vec<ValidationError>) {
    let names = placeholders(endpoint).unwrap_or_default();
    for name in &names {
        let declared = parameters
            .iter()
            .any(|p| p.location == ParamLocation::Path && p.name == *name);
        if !declared {
            errors.push(constraint(
                "endpoint",
                &format!("placeholder '{{{name}}}' has no path parameter"),
            ));
        }
    }
    for (i, p) in parameters.iter().enumerate() {
        if p.location == ParamLocation::Path && !names.contains(&p.name.as_str()) {
            errors.push(constraint(
                &format!("parameters[{i}].location"),
                &format!("endpoint has no '{{{}}}' placeholder", p.name),
            ));
        }
    }
}

fn check_mappings(
    mappings: &[FieldMapping],
    response_shape: Option<&Value>,
    errors: &mut Vec<ValidationError>,
) {
    for (i, mapping) in mappings.iter().enumerate() {
        let base = format!("mappings[{i}]");
        match schema::lookup(&mapping.field) {
            None => errors.push(unknown_canonical(&at(&base, "field"), &mapping.field)),
            Some(target) if !target.mappable => errors.push(constraint(
                &at(&base, "field"),
                &format!("'{}' is reserved and cannot be mapped", mapping.field),
            )),
            Some(target) => match mapping.coercion.output_type() {
                Some(produced) if target.field_type.accepts(produced) => {}
                Some(produced) => errors.push(constraint(
                    &at(&base, "type"),
                    &format!(
                        "produces {produced} but '{}' is {}",
                        mapping.field, target.field_type
                    ),
                )),
                None => errors.push(constraint(
                    &at(&base, "value"),
                    "constant must be a string, number or boolean",
                )),
            },
        }

        match (&mapping.path, mapping.coercion.reads_response()) {
            (None, true) => errors.push(constraint(
                &at(&base, "path"),
                "path is required unless the mapping is a constant",
            )),
            (Some(path), true) => {
                if let Some(shape) = response_shape {
                    if !path.matches_shape(shape) {
                        errors.push(constraint(
                            &at(&base, "path"),
                            &format!("'{path}' does not resolve against response_shape"),
                        ));
                    }
                }
            }
            (Some(_), false) => errors.push(constraint(
                &at(&base, "path"),
                "constant mappings do not read the response",
            )),
            (None, false) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Export template parts
// ---------------------------------------------------------------------------

fn parse_delimiter(value: &Value, path: &str) -> Check<u8> {
    let s = as_str(value, path)?;
    let bytes = s.as_bytes();
    if bytes.len() != 1 || !bytes[0].is_ascii() || matches!(bytes[0], b'\n' | b'\r' | b'"') {
        return Err(invalid(path, "delimiter must be a single ASCII character other than a quote or newline"));
    }
    Ok(bytes[0])
}

fn parse_column_format(value: &Value, path: &str) -> Check<ColumnFormat> {
    match value {
        Value::String(s) => match s.as_str() {
            "plain" => Ok(ColumnFormat::Plain),
            "timestamp_ms" => Ok(ColumnFormat::TimestampMillis),
            "timestamp_s" => Ok(ColumnFormat::TimestampSeconds),
            "rfc3339" => Ok(ColumnFormat::Rfc3339),
            "upper" => Ok(ColumnFormat::Upper),
            "lower" => Ok(ColumnFormat::Lower),
            other => Err(invalid(path, &format!("'{other}' is not a supported column format"))),
        },
        Value::Object(map) => {
            if let Some(places) = map.get("decimal") {
                reject_unknown(map, &["decimal"], path)?;
                let places = as_u64(places, &at(path, "decimal"))?;
                if places > 28 {
                    return Err(invalid(&at(path, "decimal"), "at most 28 decimal places"));
                }
                Ok(ColumnFormat::Decimal(places as u32))
            } else if let Some(pattern) = map.get("timestamp") {
                reject_unknown(map, &["timestamp"], path)?;
                Ok(ColumnFormat::TimestampPattern(non_empty_string(
                    pattern,
                    &at(path, "timestamp"),
                )?))
            } else {
                Err(invalid(path, "expected {\"decimal\": n} or {\"timestamp\": pattern}"))
            }
        }
        other => Err(wrong_type(path, "string or object", other)),
    }
}

fn parse_column(value: &Value, path: &str) -> Check<ExportColumn> {
    if let Value::String(field) = value {
        if field.is_empty() {
            return Err(invalid(path, "must not be empty"));
        }
        return Ok(ExportColumn {
            field: field.clone(),
            header: field.clone(),
            format: ColumnFormat::Plain,
        });
    }
    let map = value
        .as_object()
        .ok_or_else(|| wrong_type(path, "string or object", value))?;
    reject_unknown(map, &["field", "header", "format"], path)?;
    let field = non_empty_string(required_key(map, "field", path)?, &at(path, "field"))?;
    let header = optional_key(map, "header", path, non_empty_string)?.unwrap_or_else(|| field.clone());
    let format = optional_key(map, "format", path, parse_column_format)?.unwrap_or(ColumnFormat::Plain);
    Ok(ExportColumn {
        field,
        header,
        format,
    })
}

fn parse_order_key(value: &Value, path: &str) -> Check<OrderKey> {
    if let Value::String(field) = value {
        return Ok(OrderKey {
            field: field.clone(),
            descending: false,
        });
    }
    let map = value
        .as_object()
        .ok_or_else(|| wrong_type(path, "string or object", value))?;
    reject_unknown(map, &["field", "direction"], path)?;
    let field = non_empty_string(required_key(map, "field", path)?, &at(path, "field"))?;
    let descending = optional_key(map, "direction", path, |v, p| {
        enum_value(v, p, &[("asc", false), ("desc", true)])
    })?
    .unwrap_or(false);
    Ok(OrderKey { field, descending })
}

/// Filter parsed for structure; literals are typed against the schema later
#[derive(Debug)]
enum FilterDraft {
    Compare {
        path: String,
        field: String,
        op: CompareOp,
        value: Value,
    },
    All(Vec<FilterDraft>),
    Any(Vec<FilterDraft>),
    Not(Box<FilterDraft>),
}

fn parse_filter(value: &Value, path: &str) -> Check<FilterDraft> {
    let map = as_object(value, path)?;
    if let Some(list) = map.get("all").or_else(|| map.get("any")) {
        let key = if map.contains_key("all") { "all" } else { "any" };
        reject_unknown(map, &[key], path)?;
        let list_path = at(path, key);
        let items = list.as_array().ok_or_else(|| wrong_type(&list_path, "array", list))?;
        if items.is_empty() {
            return Err(invalid(&list_path, "must contain at least one filter"));
        }
        let parsed = items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_filter(item, &format!("{list_path}[{i}]")))
            .collect::<Check<Vec<_>>>()?;
        return Ok(if key == "all" {
            FilterDraft::All(parsed)
        } else {
            FilterDraft::Any(parsed)
        });
    }
    if let Some(inner) = map.get("not") {
        reject_unknown(map, &["not"], path)?;
        return Ok(FilterDraft::Not(Box::new(parse_filter(inner, &at(path, "not"))?)));
    }

    reject_unknown(map, &["field", "op", "value"], path)?;
    let field = non_empty_string(required_key(map, "field", path)?, &at(path, "field"))?;
    let op = enum_value(
        required_key(map, "op", path)?,
        &at(path, "op"),
        &[
            ("eq", CompareOp::Eq),
            ("ne", CompareOp::Ne),
            ("gt", CompareOp::Gt),
            ("ge", CompareOp::Ge),
            ("lt", CompareOp::Lt),
            ("le", CompareOp::Le),
        ],
    )?;
    let value = required_key(map, "value", path)?.clone();
    Ok(FilterDraft::Compare {
        path: path.to_string(),
        field,
        op,
        value,
    })
}

impl FilterDraft {
    fn finish(self, path: &str) -> Result<Filter, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let filter = self.finish_into(&mut errors);
        match filter {
            Some(filter) if errors.is_empty() => Ok(filter),
            _ if errors.is_empty() => Err(vec![constraint(path, "invalid filter")]),
            _ => Err(errors),
        }
    }

    fn finish_into(self, errors: &mut Vec<ValidationError>) -> Option<Filter> {
        match self {
            FilterDraft::Compare {
                path,
                field,
                op,
                value,
            } => {
                let Some(target) = schema::lookup(&field) else {
                    errors.push(unknown_canonical(&at(&path, "field"), &field));
                    return None;
                };
                let literal = match typed_literal(target.field_type, &value) {
                    Ok(literal) => literal,
                    Err(message) => {
                        errors.push(constraint(&at(&path, "value"), &message));
                        return None;
                    }
                };
                Some(Filter::Compare {
                    field,
                    op,
                    value: literal,
                })
            }
            FilterDraft::All(items) => Self::finish_list(items, errors).map(Filter::All),
            FilterDraft::Any(items) => Self::finish_list(items, errors).map(Filter::Any),
            FilterDraft::Not(inner) => inner.finish_into(errors).map(|f| Filter::Not(Box::new(f))),
        }
    }

    fn finish_list(items: Vec<FilterDraft>, errors: &mut Vec<ValidationError>) -> Option<Vec<Filter>> {
        let finished: Vec<Option<Filter>> = items.into_iter().map(|d| d.finish_into(errors)).collect();
        finished.into_iter().collect()
    }
}

/// Coerce a filter literal to the type of the field it is compared with
fn typed_literal(field_type: FieldType, value: &Value) -> Result<FieldValue, String> {
    let coercion = match (field_type, value) {
        (FieldType::String, Value::String(s)) => return Ok(FieldValue::String(s.clone())),
        (FieldType::String, _) => return Err("expected a string literal".to_string()),
        (FieldType::Number, _) => Coercion::Number,
        (FieldType::Integer, _) => Coercion::Integer,
        (FieldType::Boolean, _) => Coercion::Boolean,
        (FieldType::Timestamp, Value::String(_)) => Coercion::Rfc3339,
        (FieldType::Timestamp, _) => Coercion::Timestamp(TimeUnit::Millis),
    };
    coercion
        .apply(value)
        .map_err(|e| format!("literal does not fit a {field_type} field: {e}"))
}

//! Failure classification
//!
//! Maps HTTP statuses and transport errors onto the collector's failure
//! taxonomy and attaches user-facing descriptions and remediation hints.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{FetchFailure, HttpResponse, TransportError};

/// Longest body excerpt carried in a failure message
const MAX_SNIPPET_CHARS: usize = 200;

/// Classification of collection failures for retry decisions and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Timeout, connection refused, DNS failure
    TransientNetwork,
    /// HTTP 429 / 418
    RateLimited,
    /// Other HTTP 4xx
    ClientError,
    /// HTTP 5xx
    ServerError,
    /// Response body is not JSON
    InvalidBody,
    /// Request could not be built
    InvalidRequest,
    /// Response did not fit the template's mappings
    Mapping,
    /// Records could not be stored
    Sink,
}

impl FailureClass {
    /// Stable label used in metrics and structured logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::RateLimited => "rate_limited",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::InvalidBody => "invalid_body",
            Self::InvalidRequest => "invalid_request",
            Self::Mapping => "mapping",
            Self::Sink => "sink",
        }
    }

    /// User-friendly description used in log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "network error",
            Self::RateLimited => "rate limit exceeded",
            Self::ClientError => "request rejected by exchange",
            Self::ServerError => "exchange server error",
            Self::InvalidBody => "response is not valid JSON",
            Self::InvalidRequest => "request could not be built",
            Self::Mapping => "response did not match template mappings",
            Self::Sink => "record storage failed",
        }
    }

    /// Suggested remediation presented alongside fatal failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "Check network connectivity and DNS resolution",
            Self::RateLimited => "Lower the template's rate_limit or raise the poll interval",
            Self::ClientError => "Verify endpoint, parameters and credentials in the template",
            Self::ServerError => "Exchange may be experiencing issues, try again later",
            Self::InvalidBody => "Confirm the endpoint returns JSON",
            Self::InvalidRequest => "Check parameter bindings and credentials for the job",
            Self::Mapping => "Compare the template's mapping paths with the live response",
            Self::Sink => "Check the storage backend",
        }
    }

    /// Determine whether the failure is retried on the same page.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork | Self::RateLimited | Self::ServerError
        )
    }
}

/// Classify a non-success HTTP response
///
/// Returns `None` for 2xx statuses.
pub fn classify_status(response: &HttpResponse) -> Option<FetchFailure> {
    let status = response.status;
    match status {
        200..=299 => None,
        429 | 418 => Some(FetchFailure::RateLimited {
            retry_after: response.header("retry-after").and_then(parse_retry_after),
        }),
        500..=599 => Some(FetchFailure::ServerError {
            status,
            message: snippet(&response.body),
        }),
        _ => Some(FetchFailure::ClientError {
            status,
            message: snippet(&response.body),
        }),
    }
}

/// Classify a transport failure
pub fn from_transport(error: &TransportError) -> FetchFailure {
    FetchFailure::TransientNetwork(error.to_string())
}

/// Parse a `Retry-After` header (delta seconds or HTTP date)
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_SNIPPET_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MAX_SNIPPET_CHARS).collect();
    cut.push_str("...");
    cut
}

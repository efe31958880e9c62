//! HTTP transport abstraction, request execution and pagination

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::template::HttpMethod;

pub mod auth;
pub mod classify;
pub mod executor;
pub mod http;
pub mod pagination;

pub use classify::FailureClass;
pub use executor::{FetchedPage, RequestExecutor};
pub use pagination::{PagePosition, PaginationState};

/// Fully built HTTP request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method
    pub method: HttpMethod,
    /// Absolute URL with path placeholders substituted
    pub url: String,
    /// Query parameters in template order
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
    /// Deadline for the whole exchange
    pub timeout: Duration,
}

impl HttpRequest {
    /// Value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Body text
    pub body: String,
}

impl HttpResponse {
    /// Value of a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport-level failures (no HTTP response received)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Deadline elapsed
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport failure
    #[error("transport error: {0}")]
    Other(String),
}

/// Network access used by the request executor
///
/// Production code uses [`http::ReqwestTransport`]; tests script responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request and return the raw response
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Classified failure of one fetch step
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    /// Timeout, connection reset or DNS failure
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Server asked the client to slow down (429/418)
    #[error("rate limited by server (retry after {retry_after:?})")]
    RateLimited {
        /// Delay requested through `Retry-After`
        retry_after: Option<Duration>,
    },

    /// 4xx other than rate limiting
    #[error("client error {status}: {message}")]
    ClientError {
        /// Status code
        status: u16,
        /// Body excerpt
        message: String,
    },

    /// 5xx
    #[error("server error {status}: {message}")]
    ServerError {
        /// Status code
        status: u16,
        /// Body excerpt
        message: String,
    },

    /// Body is not JSON
    #[error("invalid response body: {0}")]
    InvalidBody(String),

    /// Request could not be built from the job
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchFailure {
    /// Failure class used for reporting and retry decisions
    pub fn class(&self) -> FailureClass {
        match self {
            FetchFailure::TransientNetwork(_) => FailureClass::TransientNetwork,
            FetchFailure::RateLimited { .. } => FailureClass::RateLimited,
            FetchFailure::ClientError { .. } => FailureClass::ClientError,
            FetchFailure::ServerError { .. } => FailureClass::ServerError,
            FetchFailure::InvalidBody(_) => FailureClass::InvalidBody,
            FetchFailure::InvalidRequest(_) => FailureClass::InvalidRequest,
        }
    }

    /// Whether the same page should be retried after a backoff
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

//! Request executor
//!
//! Builds one HTTP request from a job and its pagination state, sends it and
//! classifies the outcome. The executor never retries; retry policy belongs to
//! the collection loop.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::auth::apply_auth;
use super::classify::{classify_status, from_transport};
use super::pagination::{advance, request_params, PaginationState};
use super::{FetchFailure, HttpRequest, HttpTransport};
use crate::collector::job::{CollectionJob, JobTarget};
use crate::template::ParamLocation;

/// A successful page
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// HTTP status
    pub status: u16,
    /// Decoded body
    pub body: Value,
    /// When the response arrived
    pub received_at: DateTime<Utc>,
    /// Pagination state for the following request
    pub next: PaginationState,
}

/// Turns jobs into HTTP exchanges
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    default_timeout: Duration,
}

impl RequestExecutor {
    /// Create an executor over a transport
    pub fn new(transport: Arc<dyn HttpTransport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    /// Build the request for the page at `state` of one job target
    pub fn build_request(
        &self,
        job: &CollectionJob,
        target: &JobTarget,
        state: &PaginationState,
    ) -> Result<HttpRequest, FetchFailure> {
        let template = job.template();
        let mut url = template.endpoint.clone();
        let mut query = Vec::new();
        let mut headers = Vec::new();
        let mut body = Map::new();

        for param in target.params() {
            match param.location {
                ParamLocation::Path => {
                    let encoded = encode_path_segment(&param.as_text());
                    url = url.replace(&format!("{{{}}}", param.name), &encoded);
                }
                ParamLocation::Query => query.push((param.name.clone(), param.as_text())),
                ParamLocation::Header => headers.push((param.name.clone(), param.as_text())),
                ParamLocation::Body => {
                    body.insert(param.name.clone(), param.value.clone());
                }
            }
        }
        if url.contains('{') {
            return Err(FetchFailure::InvalidRequest(format!(
                "unbound path placeholder in {url}"
            )));
        }
        query.extend(request_params(&template.pagination.policy, state));

        let mut request = HttpRequest {
            method: template.method,
            url,
            query,
            headers,
            body: (!body.is_empty()).then_some(Value::Object(body)),
            timeout: template.timeout.unwrap_or(self.default_timeout),
        };
        apply_auth(&mut request, &template.auth, job.credentials())
            .map_err(FetchFailure::InvalidRequest)?;
        Ok(request)
    }

    /// Fetch the page at `state` of one job target and compute the next
    /// pagination state
    pub async fn fetch_step(
        &self,
        job: &CollectionJob,
        target: &JobTarget,
        state: &PaginationState,
    ) -> Result<FetchedPage, FetchFailure> {
        if state.is_done() {
            return Err(FetchFailure::InvalidRequest(
                "pagination already exhausted".to_string(),
            ));
        }

        let request = self.build_request(job, target, state)?;
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| from_transport(&e))?;
        let received_at = Utc::now();

        if let Some(failure) = classify_status(&response) {
            return Err(failure);
        }

        let body: Value = serde_json::from_str(&response.body)
            .map_err(|e| FetchFailure::InvalidBody(e.to_string()))?;
        let next = advance(&job.template().pagination, state, &body);

        Ok(FetchedPage {
            status: response.status,
            body,
            received_at,
            next,
        })
    }
}

/// Percent-encode a value for use as one URL path segment
///
/// Only `A-Z a-z 0-9 * - . _` stay literal; a space becomes `%20`, never `+`.
fn encode_path_segment(value: &str) -> String {
    // form encoding escapes a literal '+' as %2B, so every '+' left is a space
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

//! Shared test doubles: a scripted HTTP transport and a recording reporter

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use template_collector::collector::{CollectionEvent, LoopState, Reporter};
use template_collector::fetcher::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Scripted {
    /// HTTP response
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    /// Transport failure
    Fail(TransportError),
}

impl Scripted {
    pub fn json(body: Value) -> Self {
        Scripted::Respond {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Scripted::Respond {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn with_header(self, name: &str, value: &str) -> Self {
        match self {
            Scripted::Respond {
                status,
                mut headers,
                body,
            } => {
                headers.push((name.to_string(), value.to_string()));
                Scripted::Respond {
                    status,
                    headers,
                    body,
                }
            }
            other => other,
        }
    }
}

/// Transport replying from per-key scripts
///
/// The key of a request is the value of one query parameter (empty when the
/// parameter is missing). Each key replays its script in order; the last reply
/// repeats once the script is exhausted. Unknown keys get a 404.
pub struct MockTransport {
    key_param: String,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn keyed_by(param: &str) -> Self {
        Self {
            key_param: param.to_string(),
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, key: &str, replies: Vec<Scripted>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), replies.into());
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Keys of the requests received, in order
    pub fn keys(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.query_param(&self.key_param).unwrap_or("").to_string())
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let key = request
            .query_param(&self.key_param)
            .unwrap_or("")
            .to_string();
        self.requests.lock().unwrap().push(request);

        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Scripted::Respond {
                status,
                headers,
                body,
            }) => Ok(HttpResponse {
                status,
                headers,
                body,
            }),
            Some(Scripted::Fail(error)) => Err(error),
            None => Ok(HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: format!("no script for key '{key}'"),
            }),
        }
    }
}

/// Reporter keeping every event
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<CollectionEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CollectionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// States entered by the loop of `exchange`, in order
    pub fn states(&self, exchange: &str) -> Vec<LoopState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                CollectionEvent::StateChanged { exchange: e, to, .. } if e == exchange => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, CollectionEvent::Failure { .. }))
            .count()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: CollectionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

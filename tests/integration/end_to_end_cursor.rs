//! End-to-end collection over a cursor-paginated endpoint

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use template_collector::collector::{
    CollectionEvent, CollectionJob, CollectorOptions, LoopState, Scheduler, StopOutcome,
};
use template_collector::fetcher::auth::Credentials;
use template_collector::fetcher::FailureClass;
use template_collector::sink::{AppendOutcome, MemorySink, Sink, SinkError, SinkSnapshot};
use template_collector::template::validator::validate_request;
use template_collector::CanonicalRecord;

use crate::support::{MockTransport, RecordingReporter, Scripted};

fn cursor_template() -> Value {
    json!({
        "exchange": "mockex",
        "kind": "trade",
        "endpoint": "https://api.mockex.test/v1/trades",
        "parameters": [
            {"name": "symbol", "location": "query", "type": "string", "required": true}
        ],
        "pagination": {"kind": "cursor", "cursor_path": "$.next", "cursor_param": "cursor"},
        "rate_limit": {"requests": 10, "window_ms": 1000},
        "mappings": [
            {"field": "id", "path": "$.data[*].id", "type": "string"},
            {"field": "price", "path": "$.data[*].p", "type": "number"},
            {"field": "amount", "path": "$.data[*].q", "type": "number"},
            {"field": "timestamp", "path": "$.data[*].t", "type": "timestamp_ms"}
        ]
    })
}

fn trade(id: &str) -> Value {
    json!({"id": id, "p": "100.5", "q": "0.25", "t": 1_700_000_000_000i64})
}

fn job() -> CollectionJob {
    let template = validate_request(&cursor_template()).unwrap();
    let bindings = json!({"symbol": "BTCUSDT"}).as_object().cloned().unwrap();
    CollectionJob::new(template, bindings, Credentials::none()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_three_pages_with_rate_limited_retry() {
    let transport = Arc::new(
        MockTransport::keyed_by("cursor")
            .script("", vec![Scripted::json(json!({"data": [trade("1"), trade("2")], "next": "c2"}))])
            .script(
                "c2",
                vec![
                    Scripted::status(429, "too many requests").with_header("Retry-After", "1"),
                    Scripted::json(json!({"data": [trade("3"), trade("4")], "next": "c3"})),
                ],
            )
            .script("c3", vec![Scripted::json(json!({"data": [trade("5")], "next": null}))]),
    );
    let sink = Arc::new(MemorySink::new());
    let reporter = Arc::new(RecordingReporter::new());

    let scheduler = Scheduler::new(
        transport.clone(),
        sink.clone(),
        reporter.clone(),
        CollectorOptions::default().run_once(),
    );
    let summaries = scheduler.start(vec![job()]).unwrap().join().await;

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.outcome, StopOutcome::Completed);
    assert_eq!(summary.stats.pages, 3);
    assert_eq!(summary.stats.records_appended, 5);
    assert_eq!(summary.stats.duplicates, 0);
    assert_eq!(summary.stats.failures, 1);

    // Page 2 was requested twice, every page in order
    assert_eq!(transport.keys(), vec!["", "c2", "c2", "c3"]);
    assert!(transport
        .requests()
        .iter()
        .all(|r| r.query_param("symbol") == Some("BTCUSDT")));

    let snapshot = sink.snapshot().await.unwrap();
    let ids: Vec<String> = snapshot
        .iter()
        .map(|r| r.value("id").render().unwrap())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

    assert_eq!(
        reporter.states("mockex"),
        vec![
            LoopState::Running,
            LoopState::BackingOff,
            LoopState::Running,
            LoopState::Stopped
        ]
    );
    let retry = reporter.events().into_iter().find_map(|e| match e {
        CollectionEvent::Failure { class, retry_in, .. } => Some((class, retry_in)),
        _ => None,
    });
    assert_eq!(retry, Some((FailureClass::RateLimited, Some(Duration::from_secs(1)))));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_cycles_are_deduplicated() {
    let transport = Arc::new(MockTransport::keyed_by("cursor").script(
        "",
        vec![Scripted::json(json!({"data": [trade("1"), trade("2")], "next": null}))],
    ));
    let sink = Arc::new(MemorySink::new());
    let reporter = Arc::new(RecordingReporter::new());

    let scheduler = Scheduler::new(
        transport.clone(),
        sink.clone(),
        reporter.clone(),
        CollectorOptions::default().with_poll_interval(Duration::from_secs(1)),
    );
    let handle = scheduler.start(vec![job()]).unwrap();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    handle.stop();
    let summaries = handle.join().await;

    let summary = &summaries[0];
    assert_eq!(summary.outcome, StopOutcome::StoppedByRequest);
    assert_eq!(summary.stats.cycles, 3);
    assert_eq!(summary.stats.records_appended, 2);
    assert_eq!(summary.stats.duplicates, 4);
    assert_eq!(sink.len(), 2);
    assert_eq!(transport.requests().len(), 3);
}

/// Sink that refuses any batch which would take it past `capacity` records
struct CappedSink {
    inner: MemorySink,
    capacity: usize,
    batches: AtomicUsize,
}

#[async_trait]
impl Sink for CappedSink {
    async fn append(&self, record: CanonicalRecord) -> Result<AppendOutcome, SinkError> {
        self.append_batch(vec![record])
            .await
            .map(|mut outcomes| outcomes.remove(0))
    }

    async fn append_batch(&self, records: Vec<CanonicalRecord>) -> Result<Vec<AppendOutcome>, SinkError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if self.inner.len() + records.len() > self.capacity {
            return Err(SinkError::Unavailable("disk full".into()));
        }
        self.inner.append_batch(records).await
    }

    async fn snapshot(&self) -> Result<SinkSnapshot, SinkError> {
        self.inner.snapshot().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_page_append_leaves_no_partial_page() {
    let transport = Arc::new(
        MockTransport::keyed_by("cursor")
            .script("", vec![Scripted::json(json!({"data": [trade("1"), trade("2")], "next": "c2"}))])
            .script("c2", vec![Scripted::json(json!({"data": [trade("3"), trade("4")], "next": null}))]),
    );
    let sink = Arc::new(CappedSink {
        inner: MemorySink::new(),
        capacity: 3,
        batches: AtomicUsize::new(0),
    });
    let reporter = Arc::new(RecordingReporter::new());

    let scheduler = Scheduler::new(
        transport.clone(),
        sink.clone(),
        reporter.clone(),
        CollectorOptions::default().run_once(),
    );
    let summaries = scheduler.start(vec![job()]).unwrap().join().await;

    let summary = &summaries[0];
    assert!(matches!(summary.outcome, StopOutcome::StoppedFatal { .. }));
    assert_eq!(summary.stats.pages, 1);
    assert_eq!(summary.stats.records_appended, 2);

    // First page kept whole, second page tried twice and applied not at all
    assert_eq!(sink.batches.load(Ordering::SeqCst), 3);
    let ids: Vec<String> = sink
        .snapshot()
        .await
        .unwrap()
        .iter()
        .map(|r| r.value("id").render().unwrap())
        .collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert!(reporter.events().iter().any(|e| matches!(
        e,
        CollectionEvent::Fatal {
            class: FailureClass::Sink,
            ..
        }
    )));
}

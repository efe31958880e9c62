//! One exchange loop collecting several currency pairs

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use template_collector::collector::{CollectionEvent, CollectionJob, CollectorOptions, Scheduler, StopOutcome};
use template_collector::fetcher::auth::Credentials;
use template_collector::sink::{MemorySink, Sink};
use template_collector::template::validator::validate_request;
use template_collector::template::CurrencyPair;
use template_collector::FieldValue;

use crate::support::{MockTransport, RecordingReporter, Scripted};

fn pair_template() -> Value {
    json!({
        "exchange": "pairex",
        "kind": "trade",
        "endpoint": "https://api.pairex.test/v1/trades",
        "parameters": [
            {"name": "symbol", "location": "query", "type": "string", "required": true},
            {"name": "limit", "location": "query", "type": "integer", "default": 2}
        ],
        "pair_format": {"template": "{first}{second}", "parameter": "symbol"},
        "rate_limit": {"requests": 1, "window_ms": 1000},
        "mappings": [
            {"field": "id", "path": "$[*].id", "type": "string"},
            {"field": "price", "path": "$[*].p", "type": "number"},
            {"field": "timestamp", "path": "$[*].t", "type": "timestamp_ms"}
        ]
    })
}

fn trades(price: &str) -> Scripted {
    // Trade ids are only unique per pair on this exchange
    Scripted::json(json!([
        {"id": "1", "p": price, "t": 1_700_000_000_000i64},
        {"id": "2", "p": price, "t": 1_700_000_000_500i64}
    ]))
}

fn job() -> CollectionJob {
    let template = validate_request(&pair_template()).unwrap();
    CollectionJob::with_pairs(
        template,
        Default::default(),
        vec![CurrencyPair::new("BTC", "USD"), CurrencyPair::new("ETH", "USD")],
        Credentials::none(),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_two_pairs_share_one_loop_and_bucket() {
    let transport = Arc::new(
        MockTransport::keyed_by("symbol")
            .script("BTCUSD", vec![trades("64000")])
            .script("ETHUSD", vec![trades("3100")]),
    );
    let sink = Arc::new(MemorySink::new());
    let reporter = Arc::new(RecordingReporter::new());

    let scheduler = Scheduler::new(
        transport.clone(),
        sink.clone(),
        reporter.clone(),
        CollectorOptions::default().run_once(),
    );
    let start = Instant::now();
    let summaries = scheduler.start(vec![job()]).unwrap().join().await;

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.outcome, StopOutcome::Completed);
    assert_eq!(summary.stats.pages, 2);
    assert_eq!(summary.stats.cycles, 1);
    assert_eq!(summary.stats.records_appended, 4);
    assert_eq!(summary.stats.duplicates, 0);

    // One request per pair, paced by the exchange's single bucket
    assert_eq!(transport.keys(), vec!["BTCUSD", "ETHUSD"]);
    assert!(start.elapsed() >= Duration::from_millis(1000));

    let snapshot = sink.snapshot().await.unwrap();
    let symbols: Vec<FieldValue> = snapshot.iter().map(|r| r.value("symbol")).collect();
    assert_eq!(
        symbols,
        vec![
            FieldValue::String("BTCUSD".into()),
            FieldValue::String("BTCUSD".into()),
            FieldValue::String("ETHUSD".into()),
            FieldValue::String("ETHUSD".into())
        ]
    );

    let pairs: Vec<Option<String>> = reporter
        .events()
        .into_iter()
        .filter_map(|e| match e {
            CollectionEvent::PageCollected { pair, .. } => Some(pair),
            _ => None,
        })
        .collect();
    assert_eq!(pairs, vec![Some("BTCUSD".to_string()), Some("ETHUSD".to_string())]);
    assert!(reporter
        .events()
        .iter()
        .any(|e| matches!(e, CollectionEvent::CycleCompleted { pages: 2, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_failed_pair_does_not_block_the_next() {
    let transport = Arc::new(
        MockTransport::keyed_by("symbol")
            .script("BTCUSD", vec![Scripted::status(200, "<html>maintenance</html>")])
            .script("ETHUSD", vec![trades("3100")]),
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

    let summary = &summaries[0];
    assert_eq!(summary.outcome, StopOutcome::Completed);
    assert_eq!(summary.stats.failures, 1);
    assert_eq!(summary.stats.pages, 1);
    // A cycle with an abandoned pair is not a completed cycle
    assert_eq!(summary.stats.cycles, 0);

    assert_eq!(transport.keys(), vec!["BTCUSD", "ETHUSD"]);
    assert_eq!(sink.len(), 2);
    assert_eq!(reporter.failures(), 1);
}

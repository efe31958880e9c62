//! Sink deduplication and snapshot behaviour

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use template_collector::sink::{AppendOutcome, MemorySink, Sink};
use template_collector::{CanonicalRecord, FieldValue, RecordKind};

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn trade(exchange: &str, id: u32) -> CanonicalRecord {
    let mut fields = BTreeMap::new();
    fields.insert("id".to_string(), FieldValue::String(id.to_string()));
    fields.insert("price".to_string(), FieldValue::Number(Decimal::from(100 + id)));
    CanonicalRecord::new(exchange, RecordKind::Trade, at(1_700_000_000_000 + i64::from(id)), fields)
}

fn ticker(price: &str) -> CanonicalRecord {
    let mut fields = BTreeMap::new();
    fields.insert("symbol".to_string(), FieldValue::String("BTCUSDT".into()));
    fields.insert("last_price".to_string(), FieldValue::Number(Decimal::from_str(price).unwrap()));
    CanonicalRecord::new("binance", RecordKind::Ticker, at(1_700_000_000_000), fields)
}

#[tokio::test]
async fn test_overlapping_writers_store_each_record_once() {
    let sink = Arc::new(MemorySink::new());

    // Four writers re-ingest overlapping windows of the same trade ids
    let mut tasks = Vec::new();
    for writer in 0..4u32 {
        let sink = sink.clone();
        tasks.push(tokio::spawn(async move {
            let mut appended = 0;
            for id in writer * 10..writer * 10 + 30 {
                if sink.append(trade("binance", id)).await.unwrap() == AppendOutcome::Appended {
                    appended += 1;
                }
            }
            appended
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap();
    }

    // Ids 0..60 are distinct records
    assert_eq!(total, 60);
    assert_eq!(sink.len(), 60);
}

#[tokio::test]
async fn test_same_id_on_other_exchange_is_distinct() {
    let sink = MemorySink::new();
    assert_eq!(sink.append(trade("binance", 1)).await.unwrap(), AppendOutcome::Appended);
    assert_eq!(sink.append(trade("kraken", 1)).await.unwrap(), AppendOutcome::Appended);
    assert_eq!(
        sink.append(trade("kraken", 1)).await.unwrap(),
        AppendOutcome::DuplicateRejected
    );
}

#[tokio::test]
async fn test_composite_key_normalizes_decimals() {
    let sink = MemorySink::new();
    assert_eq!(sink.append(ticker("64000.50")).await.unwrap(), AppendOutcome::Appended);
    assert_eq!(
        sink.append(ticker("64000.5")).await.unwrap(),
        AppendOutcome::DuplicateRejected
    );
    assert_eq!(sink.append(ticker("64000.6")).await.unwrap(), AppendOutcome::Appended);
}

#[tokio::test]
async fn test_snapshot_is_isolated_and_restartable() {
    let sink = MemorySink::new();
    for id in 0..3 {
        sink.append(trade("binance", id)).await.unwrap();
    }

    let snapshot = sink.snapshot().await.unwrap();
    sink.append(trade("binance", 99)).await.unwrap();

    assert_eq!(snapshot.len(), 3);
    let first_pass: Vec<&str> = snapshot.iter().map(|r| r.dedup_key()).collect();
    let second_pass: Vec<&str> = snapshot.iter().map(|r| r.dedup_key()).collect();
    assert_eq!(first_pass, second_pass);

    let ids: Vec<FieldValue> = snapshot.iter().map(|r| r.value("id")).collect();
    assert_eq!(
        ids,
        vec![
            FieldValue::String("0".into()),
            FieldValue::String("1".into()),
            FieldValue::String("2".into())
        ]
    );
    assert_eq!(sink.snapshot().await.unwrap().len(), 4);

    let observed = snapshot.observed_fields();
    assert!(observed.contains("price"));
    assert!(observed.contains("dedup_key"));
    assert!(!observed.contains("last_price"));
}

//! Exporting a sink snapshot through an export template

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use tempfile::TempDir;

use template_collector::output::{ExportEngine, ExportError};
use template_collector::sink::{MemorySink, Sink};
use template_collector::template::validator::validate_export;
use template_collector::{CanonicalRecord, FieldValue, RecordKind};

fn trade(id: &str, price: &str, amount: &str) -> CanonicalRecord {
    let mut fields = BTreeMap::new();
    fields.insert("id".to_string(), FieldValue::String(id.to_string()));
    fields.insert("price".to_string(), FieldValue::Number(Decimal::from_str(price).unwrap()));
    fields.insert("amount".to_string(), FieldValue::Number(Decimal::from_str(amount).unwrap()));
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    CanonicalRecord::new("binance", RecordKind::Trade, ts, fields)
}

async fn filled_sink() -> MemorySink {
    let sink = MemorySink::new();
    sink.append(trade("a", "100", "1")).await.unwrap();
    sink.append(trade("b", "300", "2")).await.unwrap();
    sink.append(trade("c", "200", "3")).await.unwrap();
    sink
}

#[tokio::test]
async fn test_price_descending_without_header() {
    let sink = filled_sink().await;
    let template = validate_export(&json!({
        "format": "delimited_text",
        "columns": ["price", "amount"],
        "order_by": {"field": "price", "direction": "desc"},
        "include_header": false
    }))
    .unwrap();

    let lines: Vec<String> = ExportEngine::new(template)
        .render(&sink.snapshot().await.unwrap())
        .unwrap()
        .map(Result::unwrap)
        .collect();

    assert_eq!(lines, vec!["300,2", "200,3", "100,1"]);
}

#[tokio::test]
async fn test_export_to_file_with_metadata_columns() {
    let sink = filled_sink().await;
    let template = validate_export(&json!({
        "format": "delimited_text",
        "delimiter": ";",
        "columns": [
            {"field": "exchange", "header": "venue", "format": "upper"},
            {"field": "timestamp", "format": {"timestamp": "%Y-%m-%d"}},
            "id",
            "side"
        ],
        "null_value": "-",
        "filter": {"any": [
            {"field": "id", "op": "eq", "value": "a"},
            {"field": "price", "op": "gt", "value": 250}
        ]}
    }))
    .unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exports/trades.csv");
    let written = ExportEngine::new(template)
        .export_to_file(&sink.snapshot().await.unwrap(), &path)
        .unwrap();

    assert_eq!(written, 3);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "venue;timestamp;id;side\nBINANCE;2024-01-01;a;-\nBINANCE;2024-01-01;b;-\n"
    );
}

#[tokio::test]
async fn test_filter_on_unobserved_field_rejected() {
    let sink = filled_sink().await;
    let template = validate_export(&json!({
        "format": "json_lines",
        "columns": ["id"],
        "filter": {"field": "symbol", "op": "eq", "value": "BTCUSDT"}
    }))
    .unwrap();

    let result = ExportEngine::new(template).render(&sink.snapshot().await.unwrap());
    assert!(matches!(
        result,
        Err(ExportError::UnknownField { field, context: "filter" }) if field == "symbol"
    ));
}

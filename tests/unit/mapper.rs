//! Mapping exchange-shaped responses

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;

use template_collector::mapper::{map_response, MappingError};
use template_collector::template::validator::validate_request;
use template_collector::template::RequestTemplate;
use template_collector::{FieldValue, RecordKind};

fn template(exchange: &str, kind: &str, mappings: Value) -> RequestTemplate {
    validate_request(&json!({
        "exchange": exchange,
        "kind": kind,
        "endpoint": "https://api.example.test/v1/data",
        "rate_limit": {"requests": 10, "window_ms": 1000},
        "mappings": mappings
    }))
    .unwrap()
}

fn number(s: &str) -> FieldValue {
    FieldValue::Number(Decimal::from_str(s).unwrap())
}

#[test]
fn test_object_rows_with_split_symbol() {
    let t = template(
        "coinbase",
        "trade",
        json!([
            {"field": "id", "path": "$.trades[*].trade_id", "type": "string"},
            {"field": "price", "path": "$.trades[*].price", "type": "number"},
            {"field": "amount", "path": "$.trades[*].size", "type": "number"},
            {"field": "side", "path": "$.trades[*].side", "type": "lower"},
            {"field": "timestamp", "path": "$.trades[*].time", "type": "timestamp_rfc3339"},
            {"field": "base", "path": "$.product_id", "type": "split", "separator": "-", "index": 0},
            {"field": "quote", "path": "$.product_id", "type": "split", "separator": "-", "index": 1}
        ]),
    );
    let body = json!({
        "product_id": "BTC-USD",
        "trades": [
            {"trade_id": 9001, "price": "100.10", "size": "0.5", "side": "BUY", "time": "2024-03-01T12:00:00.123Z"},
            {"trade_id": 9002, "price": "100.20", "size": "1", "side": "SELL", "time": "2024-03-01T12:00:01Z"}
        ]
    });

    let records = map_response(&t, &body, Utc::now()).unwrap();
    assert_eq!(records.len(), 2);

    let first = &records[0];
    assert_eq!(first.exchange(), "coinbase");
    assert_eq!(first.kind(), RecordKind::Trade);
    assert_eq!(first.value("id"), FieldValue::String("9001".into()));
    assert_eq!(first.value("price"), number("100.10"));
    assert_eq!(first.value("side"), FieldValue::String("buy".into()));
    assert_eq!(first.value("base"), FieldValue::String("BTC".into()));
    assert_eq!(first.value("quote"), FieldValue::String("USD".into()));
    assert_eq!(
        first.timestamp(),
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(123)
    );
    // The mapped timestamp is metadata, not a data field
    assert!(first.field("timestamp").is_none());

    assert_eq!(records[1].value("quote"), FieldValue::String("USD".into()));
    assert_ne!(records[0].dedup_key(), records[1].dedup_key());
}

#[test]
fn test_positional_array_rows() {
    let t = template(
        "kraken",
        "trade",
        json!([
            {"field": "price", "path": "$.result.XXBTZUSD[*][0]", "type": "number"},
            {"field": "amount", "path": "$.result.XXBTZUSD[*][1]", "type": "number"},
            {"field": "timestamp", "path": "$.result.XXBTZUSD[*][2]", "type": "timestamp_s"},
            {"field": "side", "path": "$.result.XXBTZUSD[*][3]", "type": "slice", "start": 0, "end": 1},
            {"field": "symbol", "type": "constant", "value": "XBT/USD"}
        ]),
    );
    let body = json!({
        "error": [],
        "result": {
            "XXBTZUSD": [
                ["30243.4", "0.0005", 1688669597, "buy", "m", ""],
                ["30243.5", "0.0100", 1688669598, "sell", "l", ""]
            ],
            "last": "1688669598000000000"
        }
    });

    let records = map_response(&t, &body, Utc::now()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].value("price"), number("30243.4"));
    assert_eq!(records[1].value("amount"), number("0.01"));
    assert_eq!(records[0].value("side"), FieldValue::String("b".into()));
    assert_eq!(records[1].value("side"), FieldValue::String("s".into()));
    assert_eq!(records[1].value("symbol"), FieldValue::String("XBT/USD".into()));
    assert_eq!(records[0].timestamp(), Utc.timestamp_opt(1688669597, 0).unwrap());
}

#[test]
fn test_single_object_ticker_uses_receive_time() {
    let t = template(
        "okx",
        "ticker",
        json!([
            {"field": "symbol", "path": "$.data[0].instId", "type": "string"},
            {"field": "last_price", "path": "$.data[0].last", "type": "number"},
            {"field": "best_bid", "path": "$.data[0].bidPx", "type": "number"},
            {"field": "best_ask", "path": "$.data[0].askPx", "type": "number"},
            {"field": "daily_volume", "path": "$.data[0].vol24h", "type": "number", "required": false}
        ]),
    );
    let body = json!({"code": "0", "data": [{"instId": "BTC-USDT", "last": "64000.1", "bidPx": "64000", "askPx": "64000.2"}]});
    let received = Utc.with_ymd_and_hms(2024, 5, 5, 8, 30, 0).unwrap();

    let records = map_response(&t, &body, received).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp(), received);
    assert_eq!(records[0].kind(), RecordKind::Ticker);
    assert_eq!(records[0].value("daily_volume"), FieldValue::Absent);
}

#[test]
fn test_error_envelope_is_unresolved() {
    let t = template(
        "okx",
        "ticker",
        json!([{"field": "last_price", "path": "$.data[0].last", "type": "number"}]),
    );
    let body = json!({"code": "51001", "msg": "Instrument ID does not exist", "data": []});

    let err = map_response(&t, &body, Utc::now()).unwrap_err();
    assert!(matches!(err, MappingError::Unresolved { ref field, .. } if field == "last_price"));
}

#[test]
fn test_formatted_timestamp() {
    let t = template(
        "bitstamp",
        "trade",
        json!([
            {"field": "id", "path": "$[*].tid", "type": "string"},
            {"field": "timestamp", "path": "$[*].date", "type": "timestamp_format", "format": "%Y-%m-%d %H:%M:%S"}
        ]),
    );
    let body = json!([{"tid": "a1", "date": "2024-02-29 23:59:59"}]);

    let records = map_response(&t, &body, Utc::now()).unwrap();
    assert_eq!(records[0].timestamp(), Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap());
}

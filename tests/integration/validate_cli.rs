//! `validate` subcommand

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, value: serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

fn valid_request() -> serde_json::Value {
    json!({
        "exchange": "okx",
        "kind": "trade",
        "endpoint": "https://www.okx.com/api/v5/market/trades",
        "parameters": [{"name": "instId", "location": "query", "type": "string", "required": true}],
        "rate_limit": {"requests": 20, "window_ms": 2000},
        "mappings": [
            {"field": "id", "path": "$.data[*].tradeId", "type": "string"},
            {"field": "price", "path": "$.data[*].px", "type": "number"},
            {"field": "side", "path": "$.data[*].side", "type": "lower"},
            {"field": "timestamp", "path": "$.data[*].ts", "type": "timestamp_ms"}
        ]
    })
}

#[test]
fn test_valid_request_template_accepted() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "okx.json", valid_request());

    Command::cargo_bin("template-collector")
        .unwrap()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn test_every_error_reported_with_path() {
    let dir = TempDir::new().unwrap();
    let mut doc = valid_request();
    doc.as_object_mut().unwrap().remove("endpoint");
    doc["rate_limit"] = json!({"requests": 0, "window_ms": 1000});
    doc["mappings"][1]["field"] = json!("colour");
    let path = write(&dir, "broken.json", doc);

    Command::cargo_bin("template-collector")
        .unwrap()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("endpoint: required field is missing"))
        .stdout(predicate::str::contains("rate_limit.requests"))
        .stdout(predicate::str::contains("mappings[1].field"));
}

#[test]
fn test_export_kind() {
    let dir = TempDir::new().unwrap();
    let good = write(
        &dir,
        "export.json",
        json!({"format": "delimited_text", "columns": ["timestamp", "price", "amount"]}),
    );
    let bad = write(
        &dir,
        "dup.json",
        json!({"format": "delimited_text", "columns": ["price", {"field": "amount", "header": "price"}]}),
    );

    Command::cargo_bin("template-collector")
        .unwrap()
        .args(["validate", "--kind", "export"])
        .arg(&good)
        .assert()
        .success();

    Command::cargo_bin("template-collector")
        .unwrap()
        .args(["validate", "--kind", "export"])
        .arg(&good)
        .arg(&bad)
        .assert()
        .failure()
        .stdout(predicate::str::contains("dup.json: 1 error(s)"));
}

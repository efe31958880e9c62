//! Template validation through the public API

use serde_json::{json, Value};

use template_collector::template::validator::{validate, validate_export, validate_request};
use template_collector::template::{
    AuthSpec, PaginationPolicy, Template, TemplateKind, ValidationErrorKind,
};

fn binance_trades() -> Value {
    json!({
        "schema_version": 1,
        "exchange": "binance",
        "kind": "trade",
        "endpoint": "https://api.binance.com/api/v3/historicalTrades",
        "method": "GET",
        "parameters": [
            {"name": "symbol", "location": "query", "type": "string", "required": true},
            {"name": "limit", "location": "query", "type": "integer", "default": 500}
        ],
        "pagination": {
            "kind": "cursor",
            "cursor_path": "$[0].id",
            "cursor_param": "fromId",
            "max_pages": 50
        },
        "rate_limit": {"requests": 1200, "window_ms": 60000, "burst": 20},
        "auth": {"kind": "api_key", "location": "header", "name": "X-MBX-APIKEY"},
        "poll_interval_ms": 30000,
        "mappings": [
            {"field": "id", "path": "$[*].id", "type": "string"},
            {"field": "price", "path": "$[*].price", "type": "number"},
            {"field": "amount", "path": "$[*].qty", "type": "number"},
            {"field": "timestamp", "path": "$[*].time", "type": "timestamp_ms"},
            {"field": "symbol", "type": "constant", "value": "BTCUSDT"}
        ]
    })
}

#[test]
fn test_complete_template_has_zero_errors() {
    let template = validate_request(&binance_trades()).unwrap();
    assert_eq!(template.exchange, "binance");
    assert_eq!(template.pagination.max_pages, 50);
    assert!(matches!(template.pagination.policy, PaginationPolicy::Cursor(_)));
    assert!(matches!(template.auth, AuthSpec::ApiKey { .. }));
    assert_eq!(template.mappings.len(), 5);
}

#[test]
fn test_dispatch_by_kind() {
    assert!(matches!(
        validate(TemplateKind::Request, &binance_trades()),
        Ok(Template::Request(_))
    ));
    let export = json!({"format": "json_lines", "columns": ["price"]});
    assert!(matches!(validate(TemplateKind::Export, &export), Ok(Template::Export(_))));
    assert!(validate(TemplateKind::Export, &binance_trades()).is_err());
}

#[test]
fn test_each_missing_field_reported() {
    let errors = validate_request(&json!({})).unwrap_err();
    for field in ["exchange", "kind", "endpoint", "rate_limit", "mappings"] {
        assert!(errors.has_path(field), "missing {field} not reported");
    }
    assert!(errors
        .errors()
        .iter()
        .all(|e| e.kind == ValidationErrorKind::Missing));
}

#[test]
fn test_non_object_document_rejected() {
    let errors = validate_request(&json!([1, 2])).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors.errors()[0].kind,
        ValidationErrorKind::WrongType { expected: "object", found: "array" }
    ));
}

#[test]
fn test_cross_field_rules() {
    let mut doc = binance_trades();
    doc["endpoint"] = json!("https://api.example.com/{market}/trades");
    doc["parameters"][1]["location"] = json!("body");
    doc["pagination"] = json!({"kind": "offset", "offset_param": "offset"});

    let errors = validate_request(&doc).unwrap_err();
    // Placeholder without a path parameter
    assert!(errors.has_path("endpoint"));
    // Body parameter on a GET
    assert!(errors.has_path("parameters[1].location"));
    // Offset pagination without limit and page size
    assert!(errors.has_path("pagination.limit_param"));
    assert!(errors.has_path("pagination.page_size"));
}

#[test]
fn test_duplicates_rejected() {
    let mut doc = binance_trades();
    doc["parameters"][1]["name"] = json!("symbol");
    doc["mappings"][4]["field"] = json!("price");

    let errors = validate_request(&doc).unwrap_err();
    assert!(errors.has_path("parameters[1].name"));
    assert!(errors.has_path("mappings[4].field"));
}

#[test]
fn test_mapping_type_must_fit_schema() {
    let mut doc = binance_trades();
    doc["mappings"][1]["type"] = json!("boolean");
    doc["mappings"][2]["field"] = json!("dedup_key");

    let errors = validate_request(&doc).unwrap_err();
    assert!(errors.has_path("mappings[1].type"));
    assert!(errors.has_path("mappings[2].field"));
}

#[test]
fn test_unsupported_schema_version() {
    let mut doc = binance_trades();
    doc["schema_version"] = json!(2);
    assert!(validate_request(&doc).unwrap_err().has_path("schema_version"));
}

#[test]
fn test_export_rules() {
    let errors = validate_export(&json!({
        "format": "json_lines",
        "delimiter": ";",
        "columns": ["price", "volume"],
        "order_by": {"field": "price", "direction": "sideways"},
        "filter": {"field": "amount", "op": "gt", "value": "lots"}
    }))
    .unwrap_err();

    assert!(errors.has_path("delimiter"));
    assert!(errors.has_path("columns[1].field"));
    assert!(errors.has_path("order_by.direction"));
    assert!(errors.has_path("filter.value"));
}

//! Canonical record schema
//!
//! The fixed, versioned set of field names every request template maps into and
//! every export template reads from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the canonical schema templates are validated against
pub const SCHEMA_VERSION: u64 = 1;

/// Type of a canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Text
    String,
    /// Decimal number
    Number,
    /// Integer
    Integer,
    /// Boolean
    Boolean,
    /// UTC timestamp
    Timestamp,
}

impl FieldType {
    /// Name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
        }
    }

    /// Whether a value of type `produced` may be stored in a field of this type
    ///
    /// Integers widen into number fields; every other pairing must match exactly.
    pub fn accepts(&self, produced: FieldType) -> bool {
        *self == produced || (*self == FieldType::Number && produced == FieldType::Integer)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the canonical schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalField {
    /// Field name
    pub name: &'static str,
    /// Field type
    pub field_type: FieldType,
    /// Present on every record regardless of mappings
    pub metadata: bool,
    /// May be the target of a response mapping
    pub mappable: bool,
}

const fn data(name: &'static str, field_type: FieldType) -> CanonicalField {
    CanonicalField {
        name,
        field_type,
        metadata: false,
        mappable: true,
    }
}

/// All canonical fields, schema version 1
pub const CANONICAL_FIELDS: &[CanonicalField] = &[
    CanonicalField {
        name: "exchange",
        field_type: FieldType::String,
        metadata: true,
        mappable: false,
    },
    CanonicalField {
        name: "kind",
        field_type: FieldType::String,
        metadata: true,
        mappable: false,
    },
    // Falls back to the response receive time when unmapped
    CanonicalField {
        name: "timestamp",
        field_type: FieldType::Timestamp,
        metadata: true,
        mappable: true,
    },
    CanonicalField {
        name: "dedup_key",
        field_type: FieldType::String,
        metadata: true,
        mappable: false,
    },
    data("id", FieldType::String),
    data("symbol", FieldType::String),
    data("base", FieldType::String),
    data("quote", FieldType::String),
    data("side", FieldType::String),
    data("price", FieldType::Number),
    data("amount", FieldType::Number),
    data("last_price", FieldType::Number),
    data("best_bid", FieldType::Number),
    data("best_ask", FieldType::Number),
    data("daily_volume", FieldType::Number),
    data("position", FieldType::Integer),
    data("sequence", FieldType::Integer),
];

/// Look up a canonical field by name
pub fn lookup(name: &str) -> Option<&'static CanonicalField> {
    CANONICAL_FIELDS.iter().find(|f| f.name == name)
}

/// Names of the metadata fields present on every record
pub fn metadata_fields() -> impl Iterator<Item = &'static str> {
    CANONICAL_FIELDS
        .iter()
        .filter(|f| f.metadata)
        .map(|f| f.name)
}

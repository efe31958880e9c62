//! Extraction paths over JSON response trees
//!
//! Supports a small JSONPath subset: `$`, `.name`, `['name']`, `[n]` and `[*]`.
//! A field step applied to an array fans out over the array's elements, so
//! `$.data.price` over `{"data": [{"price": 1}, {"price": 2}]}` yields two values.

use serde_json::Value;
use std::fmt;

/// A single path step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Object member
    Field(String),
    /// Array element
    Index(usize),
    /// Every array element
    Wildcard,
}

/// Path parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path '{path}' at offset {offset}: {reason}")]
pub struct PathError {
    /// Path text
    pub path: String,
    /// Byte offset of the problem
    pub offset: usize,
    /// What was wrong
    pub reason: String,
}

/// Values selected by a path
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'a> {
    /// One entry per selected position; `None` where the path did not resolve
    pub values: Vec<Option<&'a Value>>,
    /// Whether the path fanned out over an array
    pub fanned_out: bool,
}

impl<'a> Resolved<'a> {
    /// The single selected value of a path that did not fan out
    pub fn single(&self) -> Option<&'a Value> {
        if self.fanned_out {
            return None;
        }
        self.values.first().copied().flatten()
    }
}

/// Parsed extraction path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    steps: Vec<PathStep>,
}

impl JsonPath {
    /// The root path `$`
    pub fn root() -> Self {
        Self {
            raw: "$".to_string(),
            steps: Vec::new(),
        }
    }

    /// Parse path text
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let err = |offset: usize, reason: &str| PathError {
            path: input.to_string(),
            offset,
            reason: reason.to_string(),
        };

        let bytes = input.as_bytes();
        if bytes.first() != Some(&b'$') {
            return Err(err(0, "path must start with '$'"));
        }

        let mut steps = Vec::new();
        let mut pos = 1;
        while pos < bytes.len() {
            match bytes[pos] {
                b'.' => {
                    let start = pos + 1;
                    let mut end = start;
                    while end < bytes.len() && is_name_byte(bytes[end]) {
                        end += 1;
                    }
                    if end == start {
                        return Err(err(start, "expected a field name after '.'"));
                    }
                    steps.push(PathStep::Field(input[start..end].to_string()));
                    pos = end;
                }
                b'[' => {
                    let close = input[pos..]
                        .find(']')
                        .map(|i| pos + i)
                        .ok_or_else(|| err(pos, "unterminated '['"))?;
                    let inner = input[pos + 1..close].trim();
                    let step = if inner == "*" {
                        PathStep::Wildcard
                    } else if let Some(name) = quoted(inner) {
                        if name.is_empty() {
                            return Err(err(pos + 1, "empty quoted field name"));
                        }
                        PathStep::Field(name.to_string())
                    } else {
                        let index = inner
                            .parse::<usize>()
                            .map_err(|_| err(pos + 1, "expected an index, '*' or a quoted name"))?;
                        PathStep::Index(index)
                    };
                    steps.push(step);
                    pos = close + 1;
                }
                _ => return Err(err(pos, "expected '.' or '['")),
            }
        }

        Ok(Self {
            raw: input.to_string(),
            steps,
        })
    }

    /// Original path text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed steps
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Evaluate the path against a response tree
    pub fn resolve<'a>(&self, root: &'a Value) -> Resolved<'a> {
        let mut current: Vec<Option<&'a Value>> = vec![Some(root)];
        let mut fanned_out = false;

        for step in &self.steps {
            let mut next = Vec::with_capacity(current.len());
            for value in current {
                match (step, value) {
                    (PathStep::Field(name), Some(Value::Object(map))) => next.push(map.get(name)),
                    (PathStep::Field(name), Some(Value::Array(items))) => {
                        fanned_out = true;
                        next.extend(items.iter().map(|item| item.get(name.as_str())));
                    }
                    (PathStep::Index(i), Some(Value::Array(items))) => next.push(items.get(*i)),
                    (PathStep::Wildcard, Some(Value::Array(items))) => {
                        fanned_out = true;
                        next.extend(items.iter().map(Some));
                    }
                    _ => next.push(None),
                }
            }
            current = next;
        }

        Resolved {
            values: current,
            fanned_out,
        }
    }

    /// Evaluate and return the first non-null value, if any
    pub fn first<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.resolve(root)
            .values
            .into_iter()
            .flatten()
            .find(|v| !v.is_null())
    }

    /// Check the path against a declared response shape
    ///
    /// The shape is a skeleton document: objects list their known members, an
    /// array's first element describes every element (an empty array accepts
    /// anything), and the string `"*"` accepts any subtree.
    pub fn matches_shape(&self, shape: &Value) -> bool {
        let mut node = shape;
        for step in &self.steps {
            if node.as_str() == Some("*") {
                return true;
            }
            // Descend through arrays the same way resolution fans out
            while let (PathStep::Field(_), Value::Array(items)) = (step, node) {
                match items.first() {
                    Some(first) => node = first,
                    None => return true,
                }
            }
            node = match (step, node) {
                (PathStep::Field(name), Value::Object(map)) => match map.get(name) {
                    Some(child) => child,
                    None => return false,
                },
                (PathStep::Index(_) | PathStep::Wildcard, Value::Array(items)) => {
                    match items.first() {
                        Some(first) => first,
                        None => return true,
                    }
                }
                (_, v) if v.as_str() == Some("*") => return true,
                _ => return false,
            };
        }
        true
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn quoted(inner: &str) -> Option<&str> {
    inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

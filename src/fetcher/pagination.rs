//! Pagination state machine
//!
//! Computes the pagination parameters of the next request and the state that
//! follows a response. Every policy terminates:
//! - Cursor: stops on a missing, null or empty cursor, the end marker, or a
//!   cursor identical to the one just used
//! - Offset / page number: stops on a short page or once the reported total is
//!   reached
//! - All policies: stop after `max_pages` pages

use serde_json::Value;

use crate::mapper::path::JsonPath;
use crate::template::{Pagination, PaginationPolicy};

/// Position of the next request within a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePosition {
    /// First page
    Start,
    /// Cursor taken from the previous response
    Cursor(String),
    /// Item offset
    Offset(u64),
    /// Page number
    Page(u64),
    /// Pagination exhausted
    Done,
}

/// Pagination progress of one collection cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    position: PagePosition,
    pages_fetched: u32,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self::start()
    }
}

impl PaginationState {
    /// State before the first request of a cycle
    pub fn start() -> Self {
        Self {
            position: PagePosition::Start,
            pages_fetched: 0,
        }
    }

    /// Whether no further request belongs to this cycle
    pub fn is_done(&self) -> bool {
        self.position == PagePosition::Done
    }

    /// Position of the next request
    pub fn position(&self) -> &PagePosition {
        &self.position
    }

    /// Pages fetched so far in this cycle
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }
}

/// Query parameters selecting the page at `state`
pub fn request_params(policy: &PaginationPolicy, state: &PaginationState) -> Vec<(String, String)> {
    let mut params = Vec::new();
    match policy {
        PaginationPolicy::None => {}
        PaginationPolicy::Cursor(cursor) => {
            if let PagePosition::Cursor(value) = &state.position {
                params.push((cursor.cursor_param.clone(), value.clone()));
            }
            if let (Some(size), Some(param)) = (cursor.page_size, &cursor.size_param) {
                params.push((param.clone(), size.to_string()));
            }
        }
        PaginationPolicy::Offset(offset) => {
            let at = match state.position {
                PagePosition::Offset(n) => n,
                _ => 0,
            };
            params.push((offset.offset_param.clone(), at.to_string()));
            params.push((offset.limit_param.clone(), offset.page_size.to_string()));
        }
        PaginationPolicy::PageNumber(page) => {
            let number = match state.position {
                PagePosition::Page(n) => n,
                _ => page.first_page,
            };
            params.push((page.page_param.clone(), number.to_string()));
            params.push((page.size_param.clone(), page.page_size.to_string()));
        }
    }
    params
}

/// State following a successful response to the request made at `state`
pub fn advance(pagination: &Pagination, state: &PaginationState, body: &Value) -> PaginationState {
    let pages_fetched = state.pages_fetched.saturating_add(1);
    let done = PaginationState {
        position: PagePosition::Done,
        pages_fetched,
    };
    if pages_fetched >= pagination.max_pages {
        return done;
    }

    let position = match &pagination.policy {
        PaginationPolicy::None => PagePosition::Done,
        PaginationPolicy::Cursor(cursor) => {
            let used = match &state.position {
                PagePosition::Cursor(c) => Some(c.as_str()),
                _ => None,
            };
            match cursor.cursor_path.first(body).and_then(cursor_text) {
                Some(next)
                    if !next.is_empty()
                        && cursor.end_marker.as_deref() != Some(next.as_str())
                        && used != Some(next.as_str()) =>
                {
                    PagePosition::Cursor(next)
                }
                _ => PagePosition::Done,
            }
        }
        PaginationPolicy::Offset(offset) => {
            let current = match state.position {
                PagePosition::Offset(n) => n,
                _ => 0,
            };
            let items = count_items(&offset.items_path, body);
            let next = current + u64::from(offset.page_size);
            let reached_total = offset
                .total_path
                .as_ref()
                .and_then(|p| total(p, body))
                .is_some_and(|t| next >= t);
            if items < offset.page_size as usize || reached_total {
                PagePosition::Done
            } else {
                PagePosition::Offset(next)
            }
        }
        PaginationPolicy::PageNumber(page) => {
            let current = match state.position {
                PagePosition::Page(n) => n,
                _ => page.first_page,
            };
            let items = count_items(&page.items_path, body);
            let seen = (current.saturating_sub(page.first_page) + 1) * u64::from(page.page_size);
            let reached_total = page
                .total_path
                .as_ref()
                .and_then(|p| total(p, body))
                .is_some_and(|t| seen >= t);
            if items < page.page_size as usize || reached_total {
                PagePosition::Done
            } else {
                PagePosition::Page(current + 1)
            }
        }
    };

    PaginationState {
        position,
        pages_fetched,
    }
}

fn cursor_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Number of items on a page
fn count_items(path: &JsonPath, body: &Value) -> usize {
    let resolved = path.resolve(body);
    if resolved.fanned_out {
        return resolved.values.iter().flatten().count();
    }
    match resolved.single() {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Null) | None => 0,
        Some(_) => 1,
    }
}

/// Total item count reported by the response
fn total(path: &JsonPath, body: &Value) -> Option<u64> {
    match path.first(body)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

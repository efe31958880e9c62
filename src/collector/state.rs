//! Per-exchange collection state

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use crate::fetcher::PaginationState;

/// Lifecycle of a collection loop
///
/// `Starting -> Running <-> BackingOff -> Stopped`; nothing re-enters `Starting`
/// and nothing leaves `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Loop created, first request not yet issued
    Starting,
    /// Issuing requests
    Running,
    /// Waiting out a retry backoff or the poll interval
    BackingOff,
    /// Terminal
    Stopped,
}

impl LoopState {
    /// Stable lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Starting => "starting",
            LoopState::Running => "running",
            LoopState::BackingOff => "backing_off",
            LoopState::Stopped => "stopped",
        }
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition(&self, to: LoopState) -> bool {
        use LoopState::*;
        matches!(
            (self, to),
            (Starting, Running)
                | (Starting, Stopped)
                | (Running, BackingOff)
                | (Running, Stopped)
                | (BackingOff, Running)
                | (BackingOff, Stopped)
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State exclusively owned by one exchange loop
#[derive(Debug, Clone)]
pub struct CollectionState {
    /// Index of the job target being collected
    pub target: usize,
    /// Pagination progress of the current target
    pub pagination: PaginationState,
    /// Failed pages since the last successful page
    pub consecutive_failures: u32,
    /// Retries of the current page so far
    pub attempt: u32,
    /// Earliest instant the next request may be issued
    pub next_request_at: Option<Instant>,
    state: LoopState,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionState {
    /// Fresh state in [`LoopState::Starting`]
    pub fn new() -> Self {
        Self {
            target: 0,
            pagination: PaginationState::start(),
            consecutive_failures: 0,
            attempt: 0,
            next_request_at: None,
            state: LoopState::Starting,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Move to `to`, returning the previous state
    ///
    /// Returns `None` and leaves the state unchanged when the transition is not
    /// legal (including self-transitions).
    pub fn transition(&mut self, to: LoopState) -> Option<LoopState> {
        if !self.state.can_transition(to) {
            return None;
        }
        let from = self.state;
        self.state = to;
        Some(from)
    }

    /// Record a successful page
    pub fn record_success(&mut self, next: PaginationState) {
        self.pagination = next;
        self.consecutive_failures = 0;
        self.attempt = 0;
    }

    /// Record a failed page and return the new consecutive-failure count
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    /// Move to the first page of the next of `targets` targets
    ///
    /// Returns false, leaving the state unchanged, when the current target is
    /// the last one.
    pub fn next_target(&mut self, targets: usize) -> bool {
        if self.target + 1 >= targets {
            return false;
        }
        self.target += 1;
        self.pagination = PaginationState::start();
        self.attempt = 0;
        true
    }

    /// Begin a new cycle from the first page of the first target
    pub fn restart_cycle(&mut self) {
        self.target = 0;
        self.pagination = PaginationState::start();
        self.attempt = 0;
    }
}

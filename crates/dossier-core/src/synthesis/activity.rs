//! Activity snapshot for a running synthesis call, released at a throttled cadence.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::providers::SynthesisEvent;

const RECENT_QUERIES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivitySnapshot {
    pub searches: u32,
    pub page_visits: u32,
    pub reasoning_steps: u32,
    pub chars: usize,
    pub elapsed_secs: u64,
    pub recent_queries: Vec<String>,
}

/// Folds stream events into a snapshot and decides when to release it.
#[derive(Debug)]
pub struct ActivityTracker {
    started: Instant,
    throttle: Duration,
    last_emit: Option<Instant>,
    searches: u32,
    page_visits: u32,
    reasoning_steps: u32,
    chars: usize,
    recent: VecDeque<String>,
}

impl ActivityTracker {
    pub fn new(started: Instant, throttle: Duration) -> Self {
        ActivityTracker {
            started,
            throttle,
            last_emit: None,
            searches: 0,
            page_visits: 0,
            reasoning_steps: 0,
            chars: 0,
            recent: VecDeque::with_capacity(RECENT_QUERIES),
        }
    }

    pub fn record(&mut self, event: &SynthesisEvent) {
        match event {
            SynthesisEvent::SearchStarted { query } => {
                self.searches += 1;
                if let Some(q) = query.as_ref().filter(|q| !q.is_empty()) {
                    if self.recent.len() == RECENT_QUERIES {
                        self.recent.pop_front();
                    }
                    self.recent.push_back(q.clone());
                }
            }
            SynthesisEvent::PageVisited { .. } => self.page_visits += 1,
            SynthesisEvent::ReasoningStep { .. } => self.reasoning_steps += 1,
            SynthesisEvent::TextDelta(delta) => self.chars += delta.chars().count(),
            _ => {}
        }
    }

    /// Raise the running character count, e.g. from a polled partial.
    pub fn raise_chars(&mut self, chars: usize) {
        self.chars = self.chars.max(chars);
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            searches: self.searches,
            page_visits: self.page_visits,
            reasoning_steps: self.reasoning_steps,
            chars: self.chars,
            elapsed_secs: self.started.elapsed().as_secs(),
            recent_queries: self.recent.iter().cloned().collect(),
        }
    }

    /// A snapshot if at least `throttle` has passed since the last release.
    pub fn poll_snapshot(&mut self) -> Option<ActivitySnapshot> {
        let now = Instant::now();
        let due = self
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.throttle);
        if !due {
            return None;
        }
        self.last_emit = Some(now);
        Some(self.snapshot())
    }
}

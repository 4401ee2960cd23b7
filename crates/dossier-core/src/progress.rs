//! Optional progress observer carried in the run context.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::synthesis::ActivitySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Screening,
    Fetch,
    Relevance,
    Dedup,
    Scoring,
    Extraction,
    GapFill,
    Render,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Screening => "screening",
            Stage::Fetch => "fetch",
            Stage::Relevance => "relevance",
            Stage::Dedup => "dedup",
            Stage::Scoring => "scoring",
            Stage::Extraction => "extraction",
            Stage::GapFill => "gap_fill",
            Stage::Render => "render",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted {
        stage: Stage,
        items: usize,
    },
    StageCompleted {
        stage: Stage,
        kept: usize,
        dropped: usize,
    },
    BatchStarted {
        batch_number: usize,
        total_batches: usize,
        sources: usize,
        chars: usize,
    },
    BatchMerged {
        batch_number: usize,
        total_quotes: usize,
        covered_dimensions: usize,
    },
    Activity {
        label: String,
        snapshot: ActivitySnapshot,
    },
}

/// Receives progress events. Must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel, e.g. for a UI task.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelObserver { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

pub type SharedObserver = Arc<dyn ProgressObserver>;

pub fn noop() -> SharedObserver {
    Arc::new(NoopObserver)
}

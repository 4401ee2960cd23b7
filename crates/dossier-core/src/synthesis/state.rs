//! Explicit state machine for one synthesis call.
//!
//! ```text
//! STREAMING ──stream_completed──▶ COMPLETED
//!     │  ├────stream_failed─────▶ FAILED
//!     │  ├────stream_lost───────▶ POLLING ──poll_completed──▶ COMPLETED
//!     │  └────cap_reached───────▶ TIME_CAPPED    ├─poll_failed──▶ FAILED
//!     │                                          └─cap_reached──▶ TIME_CAPPED
//!     └── any non-terminal ──cancel──▶ ABORTED
//! ```

use serde::Serialize;

use crate::error::{DossierError, DossierResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SynthesisState {
    Streaming,
    Polling,
    Completed,
    Failed,
    TimeCapped,
    Aborted,
}

impl SynthesisState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SynthesisState::Streaming | SynthesisState::Polling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SynthesisState::Streaming => "STREAMING",
            SynthesisState::Polling => "POLLING",
            SynthesisState::Completed => "COMPLETED",
            SynthesisState::Failed => "FAILED",
            SynthesisState::TimeCapped => "TIME_CAPPED",
            SynthesisState::Aborted => "ABORTED",
        }
    }

    /// Apply `signal`, or fail with [`DossierError::InvalidTransition`].
    pub fn next(self, signal: Signal) -> DossierResult<SynthesisState> {
        use Signal::*;
        use SynthesisState::*;

        let to = match (self, signal) {
            (Streaming, StreamCompleted) => Completed,
            (Streaming, StreamFailed) => Failed,
            (Streaming, StreamLost) => Polling,
            (Streaming, CapReached) => TimeCapped,
            (Polling, PollCompleted) => Completed,
            (Polling, PollFailed) => Failed,
            (Polling, CapReached) => TimeCapped,
            (Streaming | Polling, Cancel) => Aborted,
            (from, signal) => {
                return Err(DossierError::InvalidTransition {
                    from: from.as_str().to_string(),
                    signal: signal.as_str().to_string(),
                })
            }
        };
        Ok(to)
    }
}

impl std::fmt::Display for SynthesisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    StreamCompleted,
    StreamFailed,
    /// The stream ended or broke before a terminal event, with a job handle known.
    StreamLost,
    PollCompleted,
    PollFailed,
    CapReached,
    Cancel,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::StreamCompleted => "stream_completed",
            Signal::StreamFailed => "stream_failed",
            Signal::StreamLost => "stream_lost",
            Signal::PollCompleted => "poll_completed",
            Signal::PollFailed => "poll_failed",
            Signal::CapReached => "cap_reached",
            Signal::Cancel => "cancel",
        }
    }
}

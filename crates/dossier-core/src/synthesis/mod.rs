//! External synthesis orchestration: state machine, activity tracking and the driver.

pub mod activity;
pub mod orchestrator;
pub mod state;

pub use activity::{ActivitySnapshot, ActivityTracker};
pub use orchestrator::{SynthesisOrchestrator, SynthesisOutcome, SynthesisResult};
pub use state::{Signal, SynthesisState};

//! Structured observability hooks for pipeline run lifecycle events.
//!
//! - `RunSpan` RAII guard tags everything inside a run with its `run_id`
//! - `emit_*` functions log the key lifecycle events with stable `event` names
//!
//! Events are emitted at `info!` (or `warn!` for degradations). Set
//! `RUST_LOG` to filter and pass `--json` to the CLI for JSON lines.

use tracing::{debug, info, warn};

/// RAII guard that enters a run-scoped tracing span.
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // every event below carries run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// Run-scoped span for async code, where an entered guard must not be held
/// across `.await`.
///
/// ```ignore
/// run_stages(ctx).instrument(obs::run_span(&ctx.run_id)).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("dossier.run", run_id = %run_id)
}

/// Emit event: run started for a subject.
pub fn emit_run_started(run_id: &str, subject: &str) {
    info!(event = "run.started", run_id = %run_id, subject = %subject);
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, total_quotes: usize, covered_dimensions: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        total_quotes = total_quotes,
        covered_dimensions = covered_dimensions,
    );
}

/// Emit event: a filtering stage finished.
pub fn emit_stage_completed(stage: &str, kept: usize, dropped: usize) {
    info!(event = "stage.completed", stage = %stage, kept = kept, dropped = dropped);
}

/// Emit event: a source left the pipeline.
pub fn emit_source_dropped(stage: &str, url: &str, reason: &str) {
    debug!(event = "source.dropped", stage = %stage, url = %url, reason = %reason);
}

/// Emit event: a classifier batch was accepted wholesale (warn level).
pub fn emit_fail_open(stage: &str, batch: usize, sources: usize, reason: &dyn std::fmt::Display) {
    warn!(
        event = "stage.fail_open",
        stage = %stage,
        batch = batch,
        sources = sources,
        reason = %reason,
    );
}

/// Emit event: a batch's extraction was merged into accumulated evidence.
pub fn emit_batch_merged(batch_number: usize, total_quotes: usize, covered_dimensions: usize) {
    info!(
        event = "batch.merged",
        batch = batch_number,
        total_quotes = total_quotes,
        covered_dimensions = covered_dimensions,
    );
}

/// Emit event: a batch produced nothing usable and was skipped (warn level).
pub fn emit_batch_skipped(batch_number: usize, reason: &dyn std::fmt::Display) {
    warn!(event = "batch.skipped", batch = batch_number, reason = %reason);
}

/// Emit event: synthesis orchestrator changed state.
pub fn emit_synthesis_transition(label: &str, from: &str, to: &str) {
    info!(event = "synthesis.transition", label = %label, from = %from, to = %to);
}

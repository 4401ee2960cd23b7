//! Evidence extraction passes feeding the cumulative accumulator.
//!
//! - batched: packed batches run strictly in order, each merged before the
//!   next one is prompted with the accumulated evidence
//! - gap-fill: one web-search synthesis pass when severe gaps remain
//! - single-shot: one synthesis call over every selected source

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::batching::{format_batch_sources, Batch};
use crate::cancel::CancelSignal;
use crate::config::{BatchConfig, MergeThresholds, SynthesisConfig};
use crate::coverage::CoverageMap;
use crate::error::DossierResult;
use crate::evidence::{merge_evidence, CumulativeEvidence};
use crate::extract::{parse_evidence, ParseOutcome, ParseStrategy};
use crate::obs;
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::prompts;
use crate::providers::{Citation, CompletionOptions, CompletionService, SynthesisRequest, SynthesisService, TokenUsage};
use crate::subject::SubjectProfile;
use crate::synthesis::{SynthesisOrchestrator, SynthesisOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassOutcome {
    Merged {
        strategy: ParseStrategy,
        attempts: u32,
        quotes_added: usize,
    },
    Skipped {
        attempts: u32,
        reason: String,
    },
}

impl PassOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, PassOutcome::Merged { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch_number: usize,
    pub sources: usize,
    pub chars: usize,
    pub outcome: PassOutcome,
}

/// Result of a synthesis-backed pass (gap-fill or single-shot).
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisPassReport {
    pub outcome: PassOutcome,
    pub synthesis: Vec<SynthesisOutcome>,
    pub search_count: u32,
    pub citations: Vec<Citation>,
    pub usage: TokenUsage,
}

fn merge_parsed(
    accumulated: CumulativeEvidence,
    parsed: &CumulativeEvidence,
    thresholds: &MergeThresholds,
) -> (CumulativeEvidence, usize) {
    let before = accumulated.total_quotes();
    let merged = merge_evidence(&accumulated, parsed, thresholds);
    let added = merged.total_quotes().saturating_sub(before);
    (merged, added)
}

/// Run every batch in order, merging each into the accumulator.
///
/// A batch gets `config.attempts` tries; a transient call error or
/// unparseable output uses one up. A rejected call skips the batch at once,
/// as does a batch that never parses; both are logged.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(batches = batches.len()))]
pub async fn extract_batches(
    completion: &dyn CompletionService,
    subject: &SubjectProfile,
    batches: &[Batch],
    gap_report: &str,
    mut accumulated: CumulativeEvidence,
    config: &BatchConfig,
    thresholds: &MergeThresholds,
    cancel: &CancelSignal,
    observer: &dyn ProgressObserver,
) -> DossierResult<(CumulativeEvidence, Vec<BatchReport>)> {
    let options = CompletionOptions::new(config.max_tokens);
    let mut reports = Vec::with_capacity(batches.len());

    for batch in batches {
        cancel.check()?;
        observer.on_event(ProgressEvent::BatchStarted {
            batch_number: batch.batch_number,
            total_batches: batches.len(),
            sources: batch.len(),
            chars: batch.total_chars,
        });

        let material = format_batch_sources(batch);
        let (system, user) = if batch.batch_number == 1 {
            (prompts::first_batch_message(subject, batch.len(), gap_report), material)
        } else {
            let coverage = CoverageMap::from_evidence(&accumulated).format_for_batch();
            (
                prompts::next_batch_message(subject, batch.batch_number, batch.len(), &coverage),
                prompts::next_batch_user_message(&accumulated.to_prompt_json(), &material),
            )
        };

        let mut outcome = None;
        let mut last_problem = String::new();
        let mut attempts_made = 0;
        for attempt in 1..=config.attempts.max(1) {
            // Every external call is preceded by a cancellation check.
            cancel.check()?;
            attempts_made = attempt;
            let response = cancel.run(completion.complete(&system, &user, &options)).await?;
            let parsed = match response {
                Ok(text) => parse_evidence(&text),
                Err(e) => {
                    last_problem = e.to_string();
                    warn!(event = "batch.call_failed", batch = batch.batch_number, attempt = attempt, error = %e);
                    // Rejected requests (4xx other than 429) fail the same way again.
                    if !e.is_transient() {
                        break;
                    }
                    continue;
                }
            };
            match parsed {
                ParseOutcome::Parsed { value, strategy } => {
                    let (merged, added) = merge_parsed(accumulated, &value, thresholds);
                    accumulated = merged;
                    outcome = Some(PassOutcome::Merged {
                        strategy,
                        attempts: attempt,
                        quotes_added: added,
                    });
                    break;
                }
                failed @ ParseOutcome::Failed { .. } => {
                    last_problem = failed.failure_summary().unwrap_or_default();
                    warn!(
                        event = "batch.parse_failed",
                        batch = batch.batch_number,
                        attempt = attempt,
                        reason = %last_problem,
                    );
                }
            }
        }

        let outcome = match outcome {
            Some(merged) => {
                obs::emit_batch_merged(batch.batch_number, accumulated.total_quotes(), accumulated.covered_dimensions());
                observer.on_event(ProgressEvent::BatchMerged {
                    batch_number: batch.batch_number,
                    total_quotes: accumulated.total_quotes(),
                    covered_dimensions: accumulated.covered_dimensions(),
                });
                merged
            }
            None => {
                obs::emit_batch_skipped(batch.batch_number, &last_problem);
                PassOutcome::Skipped {
                    attempts: attempts_made,
                    reason: last_problem,
                }
            }
        };
        reports.push(BatchReport {
            batch_number: batch.batch_number,
            sources: batch.len(),
            chars: batch.total_chars,
            outcome,
        });
    }

    Ok((accumulated, reports))
}

/// Run a synthesis request up to `attempts` times until its text parses,
/// then merge the parsed evidence.
#[allow(clippy::too_many_arguments)]
async fn synthesis_pass(
    label: &str,
    service: &dyn SynthesisService,
    request: &SynthesisRequest,
    attempts: u32,
    accumulated: CumulativeEvidence,
    config: &SynthesisConfig,
    thresholds: &MergeThresholds,
    cancel: &CancelSignal,
    observer: &dyn ProgressObserver,
) -> DossierResult<(CumulativeEvidence, SynthesisPassReport)> {
    let orchestrator = SynthesisOrchestrator::new(service, config, cancel, observer);
    let mut report = SynthesisPassReport {
        outcome: PassOutcome::Skipped {
            attempts: 0,
            reason: "not attempted".to_string(),
        },
        synthesis: Vec::new(),
        search_count: 0,
        citations: Vec::new(),
        usage: TokenUsage::default(),
    };

    for attempt in 1..=attempts.max(1) {
        cancel.check()?;
        let result = orchestrator.run(label, request).await?;
        report.synthesis.push(result.outcome.clone());
        report.search_count += result.search_count;
        report.usage.add(result.usage);
        report.citations.extend(result.citations);

        let reason = match &result.outcome {
            SynthesisOutcome::Degraded { reason } if result.text.is_empty() => reason.clone(),
            _ => match parse_evidence(&result.text) {
                ParseOutcome::Parsed { value, strategy } => {
                    let (merged, added) = merge_parsed(accumulated, &value, thresholds);
                    info!(event = "synthesis.merged", label = %label, quotes_added = added);
                    report.outcome = PassOutcome::Merged {
                        strategy,
                        attempts: attempt,
                        quotes_added: added,
                    };
                    return Ok((merged, report));
                }
                failed @ ParseOutcome::Failed { .. } => failed.failure_summary().unwrap_or_default(),
            },
        };
        warn!(event = "synthesis.unusable", label = %label, attempt = attempt, reason = %reason);
        report.outcome = PassOutcome::Skipped {
            attempts: attempt,
            reason,
        };
    }

    Ok((accumulated, report))
}

/// Web-search pass over severe coverage gaps.
///
/// Returns `None` without calling the service when no dimension is at zero
/// or critical coverage.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub async fn gap_fill(
    service: &dyn SynthesisService,
    subject: &SubjectProfile,
    accumulated: CumulativeEvidence,
    config: &SynthesisConfig,
    thresholds: &MergeThresholds,
    cancel: &CancelSignal,
    observer: &dyn ProgressObserver,
) -> DossierResult<(CumulativeEvidence, Option<SynthesisPassReport>)> {
    let coverage = CoverageMap::from_evidence(&accumulated);
    if !coverage.has_severe_gaps() {
        info!(event = "gap_fill.skipped", reason = "no severe gaps");
        return Ok((accumulated, None));
    }
    let request = SynthesisRequest::streamed(
        prompts::gap_fill_message(subject, &coverage.format_for_batch(), config.max_tool_calls),
        prompts::gap_fill_user_message(&accumulated.to_prompt_json()),
    )
    .with_web_search(config.max_tool_calls);

    let (merged, report) = synthesis_pass(
        "gap_fill",
        service,
        &request,
        config.gap_fill_attempts,
        accumulated,
        config,
        thresholds,
        cancel,
        observer,
    )
    .await?;
    Ok((merged, Some(report)))
}

/// One synthesis call over every selected source instead of batches.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(sources = batch.len()))]
pub async fn single_shot(
    service: &dyn SynthesisService,
    subject: &SubjectProfile,
    batch: &Batch,
    gap_report: &str,
    accumulated: CumulativeEvidence,
    config: &SynthesisConfig,
    thresholds: &MergeThresholds,
    cancel: &CancelSignal,
    observer: &dyn ProgressObserver,
) -> DossierResult<(CumulativeEvidence, SynthesisPassReport)> {
    let request = SynthesisRequest::streamed(
        prompts::single_shot_message(subject, batch.len(), gap_report, config.max_tool_calls),
        format_batch_sources(batch),
    )
    .with_web_search(config.max_tool_calls);

    synthesis_pass(
        "single_shot",
        service,
        &request,
        1,
        accumulated,
        config,
        thresholds,
        cancel,
        observer,
    )
    .await
}

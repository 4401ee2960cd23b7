//! Post-fetch relevance filter.
//!
//! Keeps sources about the subject, by the subject, or about an organization
//! the subject belonged to during an overlapping tenure window. Fail-open in
//! the same way as screening; bypass sources skip the check.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelSignal;
use crate::config::RelevanceConfig;
use crate::error::DossierResult;
use crate::extract::{json_object, result_index};
use crate::obs;
use crate::prompts;
use crate::providers::{CompletionOptions, CompletionService};
use crate::source::Source;
use crate::subject::SubjectProfile;
use crate::text::take_chars;

const STAGE: &str = "relevance";

/// Classification calls per batch before it fails open.
const CLASSIFY_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Irrelevant {
    pub url: String,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelevanceStats {
    pub total_received: usize,
    pub passed: usize,
    pub failed: usize,
    pub fail_open: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelevanceOutcome {
    pub passed: Vec<Source>,
    pub failed: Vec<Irrelevant>,
    pub stats: RelevanceStats,
}

/// `(relevant, reason)` for one classifier result.
fn parse_result(item: &Value) -> (bool, String) {
    let relevant = item.get("relevant").and_then(Value::as_bool).unwrap_or(true);
    let reason = item
        .get("reason")
        .and_then(Value::as_str)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or("Not relevant to subject")
        .to_string();
    (relevant, reason)
}

fn pass_fail_open(batch: Vec<Source>, outcome: &mut RelevanceOutcome) {
    outcome.stats.fail_open += batch.len();
    outcome.passed.extend(batch);
}

#[instrument(skip_all, fields(sources = sources.len()))]
pub async fn filter_relevance(
    completion: &dyn CompletionService,
    subject: &SubjectProfile,
    seed_document: &str,
    sources: Vec<Source>,
    config: &RelevanceConfig,
    cancel: &CancelSignal,
) -> DossierResult<RelevanceOutcome> {
    let mut outcome = RelevanceOutcome {
        stats: RelevanceStats {
            total_received: sources.len(),
            ..Default::default()
        },
        ..Default::default()
    };

    let (bypass, needs_filter): (Vec<Source>, Vec<Source>) = sources.into_iter().partition(|s| s.bypass_screening);
    outcome.passed.extend(bypass);

    let seed = take_chars(seed_document, config.seed_excerpt_chars);
    let options = CompletionOptions::new(config.max_tokens);
    let mut pending = needs_filter.into_iter().peekable();
    let mut batch_number = 0;

    while pending.peek().is_some() {
        cancel.check()?;
        batch_number += 1;
        let batch: Vec<Source> = pending.by_ref().take(config.batch_size.max(1)).collect();

        let prompt = prompts::relevance_prompt(
            subject,
            seed,
            &batch,
            config.excerpt_head_chars,
            config.excerpt_tail_chars,
        );
        let mut results = None;
        let mut problem = String::new();
        for attempt in 1..=CLASSIFY_ATTEMPTS {
            cancel.check()?;
            let response = cancel
                .run(completion.complete(prompts::RELEVANCE_SYSTEM, &prompt, &options))
                .await?;
            let retryable = match response {
                Ok(text) => match json_object(&text).and_then(|mut obj| obj.remove("results")) {
                    Some(Value::Array(items)) => {
                        results = Some(items);
                        break;
                    }
                    _ => {
                        problem = "no results object in response".to_string();
                        true
                    }
                },
                Err(e) => {
                    problem = e.to_string();
                    e.is_transient()
                }
            };
            warn!(event = "relevance.batch_failed", batch = batch_number, attempt = attempt, reason = %problem);
            if !retryable {
                break;
            }
        }
        let Some(results) = results else {
            obs::emit_fail_open(STAGE, batch_number, batch.len(), &problem);
            pass_fail_open(batch, &mut outcome);
            continue;
        };

        let mut verdicts: Vec<Option<(bool, String)>> = vec![None; batch.len()];
        let mut seen = HashSet::new();
        for item in &results {
            if let Some(idx) = result_index(item, batch.len()) {
                if seen.insert(idx) {
                    verdicts[idx] = Some(parse_result(item));
                }
            }
        }

        for (source, verdict) in batch.into_iter().zip(verdicts) {
            match verdict {
                Some((true, _)) => outcome.passed.push(source),
                Some((false, reason)) => {
                    obs::emit_source_dropped(STAGE, &source.url, &reason);
                    outcome.failed.push(Irrelevant {
                        url: source.url,
                        title: source.title,
                        reason,
                    });
                }
                None => {
                    debug!(url = %source.url, "source missing from relevance response, passed");
                    outcome.stats.fail_open += 1;
                    outcome.passed.push(source);
                }
            }
        }
    }

    outcome.stats.passed = outcome.passed.len();
    outcome.stats.failed = outcome.failed.len();
    obs::emit_stage_completed(STAGE, outcome.stats.passed, outcome.stats.failed);
    Ok(outcome)
}

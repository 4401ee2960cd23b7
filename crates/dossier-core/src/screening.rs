//! Screening and attribution: drop sources about the wrong person or with no
//! usable signal, and tag survivors with how they relate to the subject.
//!
//! A cheap rule-based pre-filter runs first; the rest is classified in
//! batches by a completion call. Classification is fail-open: an error or an
//! unparseable answer accepts the whole batch as `target_coverage`.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelSignal;
use crate::config::ScreeningConfig;
use crate::error::DossierResult;
use crate::extract::{json_array, result_index};
use crate::obs;
use crate::prompts;
use crate::providers::{CompletionOptions, CompletionService};
use crate::source::{Attribution, KillReason, Source};
use crate::subject::SubjectProfile;

const STAGE: &str = "screening";

/// Classification calls per batch before it fails open.
const CLASSIFY_ATTEMPTS: u32 = 2;

const DIRECTORY_URL_PATTERNS: &[&str] = &[
    r"whitepages\.com",
    r"spokeo\.com",
    r"beenverified\.com",
    r"fastpeoplesearch",
    r"zoominfo\.com/p/",
    r"linkedin\.com/pub/dir",
    r"signalhire\.com",
    r"rocketreach\.co",
    r"contactout\.com",
    r"lusha\.com",
    r"apollo\.io/contacts",
    r"peoplefinders\.com",
    r"intelius\.com",
    r"truepeoplesearch\.com",
    r"thatsthem\.com",
    r"radaris\.com",
    r"pipl\.com",
    r"instantcheckmate\.com",
];

const BOILERPLATE_PATTERNS: &[&str] = &[
    r"(?is)(?:we use cookies|cookie policy|privacy policy|accept all cookies|manage preferences).{0,500}",
    r"(?i)(?:home|about|contact|login|sign up|subscribe|newsletter)\s*[|/]\s*",
    r"(?is)(?:copyright|©|all rights reserved|terms of service).*",
    r"(?i)(?:share on|follow us|tweet this|facebook|linkedin|twitter)[|/\s]*",
];

/// Characters on each side of a name mention inspected for citation context.
const NAME_CONTEXT_CHARS: usize = 200;

fn directory_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        DIRECTORY_URL_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect()
    })
}

fn boilerplate_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| BOILERPLATE_PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect())
}

fn citation_context() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)footnote|bibliography|references|participant|attendee|contributor list|acknowledgment").ok()
    })
    .as_ref()
}

/// Content with cookie banners, navigation, footers and share widgets removed.
pub fn strip_boilerplate(content: &str) -> String {
    let mut cleaned = content.to_string();
    for re in boilerplate_patterns() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned.trim().to_string()
}

pub fn is_directory_url(url: &str) -> bool {
    directory_patterns().iter().any(|re| re.is_match(url))
}

/// Windows of `NAME_CONTEXT_CHARS` around each mention of `name`, lowercased.
fn name_contexts(content: &str, name: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut contexts = Vec::new();
    let mut from = 0;
    while let Some(rel) = lower[from..].find(&needle) {
        let idx = from + rel;
        let end_of_name = idx + needle.len();
        let start = lower[..idx]
            .char_indices()
            .rev()
            .nth(NAME_CONTEXT_CHARS - 1)
            .map_or(0, |(i, _)| i);
        let end = lower[end_of_name..]
            .char_indices()
            .nth(NAME_CONTEXT_CHARS)
            .map_or(lower.len(), |(i, _)| end_of_name + i);
        contexts.push(lower[start..end].to_string());
        from = end_of_name;
    }
    contexts
}

/// Large PDF where every mention of the subject sits in a citation-like context.
fn is_marginal_pdf_mention(source: &Source, subject: &SubjectProfile, large_pdf_chars: usize) -> bool {
    let Some(content) = source.content.as_deref() else {
        return false;
    };
    let is_pdf = source
        .url
        .split(['?', '#'])
        .next()
        .is_some_and(|path| path.to_ascii_lowercase().ends_with(".pdf"));
    if !is_pdf || content.chars().count() <= large_pdf_chars {
        return false;
    }
    let Some(citation) = citation_context() else {
        return false;
    };
    let contexts = name_contexts(content, &subject.name);
    !contexts.is_empty() && contexts.iter().all(|ctx| citation.is_match(ctx))
}

/// A source removed during screening.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenedOut {
    pub url: String,
    pub title: String,
    /// `None` for rule-based rejections that are not one of the kill categories.
    pub kill_reason: Option<KillReason>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScreeningStats {
    pub auto_rejected: usize,
    pub bypassed: usize,
    pub classified: usize,
    pub kept: usize,
    pub killed: usize,
    pub fail_open: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScreeningOutcome {
    pub accepted: Vec<Source>,
    pub killed: Vec<ScreenedOut>,
    pub stats: ScreeningStats,
}

/// Result of the rule-based pre-filter for one source.
#[derive(Debug, Clone, PartialEq)]
pub enum Prefilter {
    Bypass,
    Reject {
        kill_reason: Option<KillReason>,
        reason: &'static str,
    },
    NeedsClassification,
}

/// Rule-based screening, no external call.
pub fn prefilter(source: &Source, subject: &SubjectProfile, config: &ScreeningConfig) -> Prefilter {
    if source.bypass_screening {
        return Prefilter::Bypass;
    }

    if is_directory_url(&source.url) {
        return Prefilter::Reject {
            kill_reason: Some(KillReason::DirectoryListing),
            reason: "Directory/people-search page",
        };
    }

    if !source.from_institutional_query() {
        let haystack = format!(
            "{} {} {}",
            source.title,
            source.snippet,
            source.content.as_deref().unwrap_or("")
        );
        if !subject.is_named_in(&haystack) {
            return Prefilter::Reject {
                kill_reason: Some(KillReason::WrongPerson),
                reason: "Subject name not found in title, snippet or content",
            };
        }
    }

    if let Some(content) = source.content.as_deref() {
        if strip_boilerplate(content).chars().count() < config.min_clean_chars {
            return Prefilter::Reject {
                kill_reason: None,
                reason: "Content too short after boilerplate removal",
            };
        }
    }

    if is_marginal_pdf_mention(source, subject, config.large_pdf_chars) {
        return Prefilter::Reject {
            kill_reason: Some(KillReason::PassiveInteraction),
            reason: "PDF mentions subject only in footnotes or bibliography",
        };
    }

    Prefilter::NeedsClassification
}

/// One parsed classifier verdict.
#[derive(Debug, Clone, PartialEq)]
enum Verdict {
    Keep {
        attribution: Attribution,
        institutional_context: Option<String>,
    },
    Kill {
        kill_reason: Option<KillReason>,
        reason: String,
    },
}

fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_verdict(item: &Value) -> Verdict {
    let decision = str_field(item, "decision").unwrap_or("KEEP");
    if decision.eq_ignore_ascii_case("KILL") {
        Verdict::Kill {
            kill_reason: str_field(item, "kill_reason").and_then(KillReason::parse),
            reason: str_field(item, "reason").unwrap_or("Killed by classifier").to_string(),
        }
    } else {
        Verdict::Keep {
            attribution: str_field(item, "attribution")
                .and_then(Attribution::parse)
                .unwrap_or(Attribution::FAIL_OPEN_DEFAULT),
            institutional_context: str_field(item, "institutional_context").map(str::to_string),
        }
    }
}

fn accept_fail_open(mut source: Source, outcome: &mut ScreeningOutcome) {
    if source.attribution.is_none() {
        source.attribution = Some(Attribution::FAIL_OPEN_DEFAULT);
    }
    outcome.stats.fail_open += 1;
    outcome.accepted.push(source);
}

/// Screen `sources` for the subject.
///
/// Only cancellation is an error; every service or parse failure degrades to
/// accepting the affected batch.
#[instrument(skip_all, fields(sources = sources.len()))]
pub async fn screen_sources(
    completion: &dyn CompletionService,
    subject: &SubjectProfile,
    sources: Vec<Source>,
    config: &ScreeningConfig,
    cancel: &CancelSignal,
) -> DossierResult<ScreeningOutcome> {
    let mut outcome = ScreeningOutcome::default();
    let mut pending = Vec::new();

    for source in sources {
        match prefilter(&source, subject, config) {
            Prefilter::Bypass => {
                outcome.stats.bypassed += 1;
                outcome.accepted.push(source);
            }
            Prefilter::Reject { kill_reason, reason } => {
                obs::emit_source_dropped(STAGE, &source.url, reason);
                outcome.stats.auto_rejected += 1;
                outcome.killed.push(ScreenedOut {
                    url: source.url,
                    title: source.title,
                    kill_reason,
                    reason: reason.to_string(),
                });
            }
            Prefilter::NeedsClassification => pending.push(source),
        }
    }

    outcome.stats.classified = pending.len();
    let options = CompletionOptions::new(config.max_tokens);
    let batch_size = config.batch_size.max(1);
    let mut pending = pending.into_iter().peekable();
    let mut batch_number = 0;

    while pending.peek().is_some() {
        cancel.check()?;
        batch_number += 1;
        let batch: Vec<Source> = pending.by_ref().take(batch_size).collect();

        let prompt = prompts::screening_prompt(subject, &batch);
        let mut items = None;
        let mut problem = String::new();
        for attempt in 1..=CLASSIFY_ATTEMPTS {
            cancel.check()?;
            let response = cancel
                .run(completion.complete(prompts::SCREENING_SYSTEM, &prompt, &options))
                .await?;
            let retryable = match response {
                Ok(text) => match json_array(&text) {
                    Some(parsed) => {
                        items = Some(parsed);
                        break;
                    }
                    None => {
                        problem = "no JSON array in response".to_string();
                        true
                    }
                },
                Err(e) => {
                    problem = e.to_string();
                    e.is_transient()
                }
            };
            warn!(event = "screening.batch_failed", batch = batch_number, attempt = attempt, reason = %problem);
            if !retryable {
                break;
            }
        }
        let Some(items) = items else {
            obs::emit_fail_open(STAGE, batch_number, batch.len(), &problem);
            batch.into_iter().for_each(|s| accept_fail_open(s, &mut outcome));
            continue;
        };

        let mut verdicts: Vec<Option<Verdict>> = vec![None; batch.len()];
        let mut seen = HashSet::new();
        for item in &items {
            if let Some(idx) = result_index(item, batch.len()) {
                if seen.insert(idx) {
                    verdicts[idx] = Some(parse_verdict(item));
                }
            }
        }

        for (mut source, verdict) in batch.into_iter().zip(verdicts) {
            match verdict {
                Some(Verdict::Keep {
                    attribution,
                    institutional_context,
                }) => {
                    source.attribution = Some(attribution);
                    if institutional_context.is_some() {
                        source.institutional_context = institutional_context;
                    }
                    outcome.accepted.push(source);
                }
                Some(Verdict::Kill { kill_reason, reason }) => {
                    obs::emit_source_dropped(STAGE, &source.url, &reason);
                    outcome.stats.killed += 1;
                    outcome.killed.push(ScreenedOut {
                        url: source.url,
                        title: source.title,
                        kill_reason,
                        reason,
                    });
                }
                None => {
                    debug!(url = %source.url, "source missing from screening response, accepted");
                    accept_fail_open(source, &mut outcome);
                }
            }
        }
    }

    outcome.stats.kept = outcome.accepted.len();
    obs::emit_stage_completed(STAGE, outcome.accepted.len(), outcome.killed.len());
    Ok(outcome)
}

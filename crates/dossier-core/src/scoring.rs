//! Dimension scoring and scarcity-weighted source selection.
//!
//! Scoring asks a completion service for per-dimension depth (0..=3) on each
//! source, in concurrent batches. Selection is pure: a greedy pick that
//! re-weights dimensions after every choice so scarce dimensions pull in the
//! sources that cover them, followed by a small-first backfill of the budget.
//! Sources whose scoring failed stay selectable and fill what budget is left.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use url::Url;

use crate::cancel::CancelSignal;
use crate::config::ScoringConfig;
use crate::coverage::CoverageMap;
use crate::dedup::normalize_url;
use crate::dimensions::{self, DIMENSIONS, DIMENSION_COUNT};
use crate::error::DossierResult;
use crate::extract::json_array;
use crate::obs;
use crate::prompts;
use crate::providers::{CompletionOptions, CompletionService};
use crate::source::{Source, SourceTier};

const STAGE: &str = "scoring";

/// Scoring attempts per batch before it is scored as all zeros.
const SCORING_ATTEMPTS: u32 = 2;

pub const NO_SIGNAL_REASON: &str = "no behavioral signal";
pub const EXCLUDED_REASON: &str = "excluded by budget/rank";

fn clear_scores(source: &mut Source) {
    source.depth_scores.clear();
    source.source_tier = SourceTier::DEFAULT;
}

fn depth_from_value(value: &Value) -> Option<u8> {
    let raw = value.as_f64()?;
    // Clamped into 0..=3 before the cast.
    Some(raw.round().clamp(0.0, 3.0) as u8)
}

/// Apply one model entry to `source`, replacing any previous scores.
fn apply_entry(source: &mut Source, entry: &Value) {
    source.unscored = false;
    let tier = entry
        .get("source_tier")
        .and_then(Value::as_f64)
        .map(|t| t.round() as i64);
    source.source_tier = SourceTier::from_model(tier);

    let mut scores = BTreeMap::new();
    if let Some(map) = entry.get("depth_scores").and_then(Value::as_object) {
        for (dim, value) in map {
            let Some(id) = dim.trim().parse::<u8>().ok().filter(|id| dimensions::by_id(*id).is_some()) else {
                continue;
            };
            if let Some(depth) = depth_from_value(value).filter(|d| *d > 0) {
                scores.insert(id, depth);
            }
        }
    }
    source.depth_scores = scores;
}

async fn score_batch(
    completion: &dyn CompletionService,
    subject_name: &str,
    batch_number: usize,
    mut batch: Vec<Source>,
    options: &CompletionOptions,
    cancel: &CancelSignal,
) -> DossierResult<Vec<Source>> {
    let prompt = prompts::scoring_prompt(subject_name, &batch);

    for attempt in 1..=SCORING_ATTEMPTS {
        cancel.check()?;
        let response = cancel
            .run(completion.complete(prompts::SCORING_SYSTEM, &prompt, options))
            .await?;

        let problem = match response {
            Ok(text) => match json_array(&text) {
                Some(items) => {
                    // Entries are matched by position; extra entries are ignored.
                    for (k, source) in batch.iter_mut().enumerate() {
                        match items.get(k) {
                            Some(entry) => apply_entry(source, entry),
                            None => clear_scores(source),
                        }
                    }
                    return Ok(batch);
                }
                None => "no JSON array in response".to_string(),
            },
            Err(e) => e.to_string(),
        };
        warn!(
            event = "scoring.batch_failed",
            batch = batch_number,
            attempt = attempt,
            reason = %problem,
        );
    }

    obs::emit_fail_open(STAGE, batch_number, batch.len(), &"kept unscored after retry");
    for source in &mut batch {
        clear_scores(source);
        source.unscored = true;
    }
    Ok(batch)
}

/// Score every source, keeping input order.
#[instrument(skip_all, fields(sources = sources.len()))]
pub async fn score_sources(
    completion: &dyn CompletionService,
    subject_name: &str,
    sources: Vec<Source>,
    config: &ScoringConfig,
    concurrency: usize,
    cancel: &CancelSignal,
) -> DossierResult<Vec<Source>> {
    let options = CompletionOptions::new(config.max_tokens);
    let batch_size = config.batch_size.max(1);

    let mut batches = Vec::new();
    let mut iter = sources.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect::<Vec<_>>());
    }

    let scored: Vec<Vec<Source>> = stream::iter(batches.into_iter().enumerate())
        .map(|(i, batch)| score_batch(completion, subject_name, i + 1, batch, &options, cancel))
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let scored: Vec<Source> = scored.into_iter().flatten().collect();
    let with_signal = scored.iter().filter(|s| s.signal_dimensions() > 0).count();
    info!(
        event = "scoring.completed",
        scored = scored.len(),
        with_signal = with_signal,
        all_zero = scored.len() - with_signal,
    );
    Ok(scored)
}

/// Host without `www.`, used for concentration penalties.
fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| url.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotSelected {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    /// Selected sources in pick order.
    pub selected: Vec<Source>,
    pub not_selected: Vec<NotSelected>,
    /// Coverage predicted from depth scores of the selected sources.
    pub predicted: CoverageMap,
    pub total_chars: usize,
    pub backfilled: usize,
    /// Unscored sources taken after every scored pick.
    pub unscored_kept: usize,
}

struct Tally {
    coverage: [usize; DIMENSION_COUNT + 1],
    tiers: BTreeMap<u8, usize>,
    domains: BTreeMap<String, usize>,
    chars: usize,
}

impl Tally {
    fn new() -> Self {
        Tally {
            coverage: [0; DIMENSION_COUNT + 1],
            tiers: BTreeMap::new(),
            domains: BTreeMap::new(),
            chars: 0,
        }
    }

    fn add(&mut self, source: &Source) {
        for (id, depth) in &source.depth_scores {
            if *depth > 0 {
                if let Some(slot) = self.coverage.get_mut(usize::from(*id)) {
                    *slot += 1;
                }
            }
        }
        *self.tiers.entry(source.source_tier.get()).or_default() += 1;
        *self.domains.entry(domain_of(&source.url)).or_default() += 1;
        self.chars += source.char_count();
    }

    fn score(&self, source: &Source, config: &ScoringConfig) -> f64 {
        let mut sum = 0.0;
        for (id, depth) in &source.depth_scores {
            let Some(dim) = dimensions::by_id(*id) else { continue };
            if *depth == 0 {
                continue;
            }
            let covered = self.coverage.get(usize::from(*id)).copied().unwrap_or(0) as f64;
            let scarcity = (f64::from(dim.target()) / covered.max(0.5)).min(config.scarcity_cap);
            sum += f64::from(*depth) * dim.tier.weight() * scarcity;
        }

        let tier_count = self.tiers.get(&source.source_tier.get()).copied().unwrap_or(0);
        let bonus_idx = tier_count.min(config.diversity_bonuses.len().saturating_sub(1));
        let diversity = config.diversity_bonuses.get(bonus_idx).copied().unwrap_or(1.0);

        let domain_count = self.domains.get(&domain_of(&source.url)).copied().unwrap_or(0);
        let domain_factor = config
            .domain_penalties
            .iter()
            .filter(|p| domain_count >= p.after)
            .map(|p| 1.0 - p.penalty)
            .last()
            .unwrap_or(1.0);

        let chars = source.char_count().max(1) as f64;
        sum * diversity * domain_factor / chars * 1000.0
    }
}

/// Greedy scarcity-weighted selection under the content budget, then backfill.
pub fn select_sources(sources: Vec<Source>, config: &ScoringConfig) -> Selection {
    let mut remaining = sources;
    remaining.sort_by_cached_key(|s| normalize_url(&s.url));

    let mut tally = Tally::new();
    let mut selected = Vec::new();

    loop {
        // Strictly greater keeps the first candidate in URL order on ties.
        let mut best: Option<(usize, f64)> = None;
        for (i, source) in remaining.iter().enumerate() {
            let score = tally.score(source, config);
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        let Some((idx, score)) = best else { break };
        if score <= 0.0 {
            break;
        }
        let chars = remaining[idx].char_count();
        if !selected.is_empty() && tally.chars + chars > config.content_budget_chars {
            break;
        }
        let chosen = remaining.remove(idx);
        tally.add(&chosen);
        selected.push(chosen);
    }

    let mut candidates: Vec<usize> = (0..remaining.len())
        .filter(|&i| {
            let s = &remaining[i];
            s.signal_dimensions() >= config.min_backfill_dimensions
                && tally.chars + s.char_count() <= config.content_budget_chars
        })
        .collect();
    candidates.sort_by_key(|&i| remaining[i].char_count());

    let mut taken = Vec::new();
    for i in candidates {
        if tally.chars + remaining[i].char_count() <= config.content_budget_chars {
            tally.add(&remaining[i]);
            taken.push(i);
        }
    }
    taken.sort_unstable_by(|a, b| b.cmp(a));
    let mut backfill: Vec<Source> = taken.into_iter().map(|i| remaining.remove(i)).collect();
    backfill.sort_by_key(Source::char_count);
    let backfilled = backfill.len();
    selected.extend(backfill);

    // Unscored sources rank after every scored one, smallest first.
    let mut unscored: Vec<usize> = (0..remaining.len()).filter(|&i| remaining[i].unscored).collect();
    unscored.sort_by_key(|&i| remaining[i].char_count());
    let mut kept = Vec::new();
    for i in unscored {
        let chars = remaining[i].char_count();
        if (selected.is_empty() && kept.is_empty()) || tally.chars + chars <= config.content_budget_chars {
            tally.add(&remaining[i]);
            kept.push(i);
        }
    }
    kept.sort_unstable_by(|a, b| b.cmp(a));
    let mut fallback: Vec<Source> = kept.into_iter().map(|i| remaining.remove(i)).collect();
    fallback.sort_by_key(Source::char_count);
    let unscored_kept = fallback.len();
    selected.extend(fallback);

    let not_selected = remaining
        .iter()
        .map(|s| NotSelected {
            url: s.url.clone(),
            reason: if s.signal_dimensions() == 0 && !s.unscored {
                NO_SIGNAL_REASON.to_string()
            } else {
                EXCLUDED_REASON.to_string()
            },
        })
        .collect::<Vec<_>>();

    let predicted = CoverageMap::from_counts(
        DIMENSIONS
            .iter()
            .map(|d| (d, tally.coverage.get(usize::from(d.id)).copied().unwrap_or(0))),
    );

    info!(
        event = "selection.completed",
        selected = selected.len(),
        backfilled = backfilled,
        unscored_kept = unscored_kept,
        not_selected = not_selected.len(),
        total_chars = tally.chars,
    );
    obs::emit_stage_completed(STAGE, selected.len(), not_selected.len());

    Selection {
        selected,
        not_selected,
        predicted,
        total_chars: tally.chars,
        backfilled,
        unscored_kept,
    }
}

/// Predicted gap report embedded in the first extraction batch.
pub fn format_gap_report(predicted: &CoverageMap) -> String {
    let mut lines = vec![
        "COVERAGE GAP ANALYSIS FROM PRE-RESEARCH:".to_string(),
        "The following dimensions have weak or zero coverage in the pre-loaded".to_string(),
        "sources. Squeeze the sources for anything that addresses them:".to_string(),
        String::new(),
    ];
    let mut any = false;
    for e in predicted.gaps() {
        any = true;
        lines.push(format!(
            "{}. {} — {} ({} sources, need {})",
            e.dimension.id, e.dimension.key, e.status, e.coverage_count, e.target
        ));
    }
    if !any {
        lines.push("All dimensions have sufficient coverage. Gap-fill search is optional.".to_string());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::fakes::ScriptedCompletion;

    fn scored(url: &str, chars: usize, scores: &[(u8, u8)]) -> Source {
        let mut s = Source::new(url, "t", "").with_content("x".repeat(chars));
        s.depth_scores = scores.iter().copied().collect();
        s
    }

    #[test]
    fn test_apply_entry_clamps_and_filters() {
        let mut s = Source::new("https://a.org", "t", "");
        let entry: Value = serde_json::json!({
            "source_tier": 9,
            "depth_scores": {"1": 2.6, "4": 7, "30": 3, "x": 1, "5": 0, "6": -2}
        });
        apply_entry(&mut s, &entry);
        assert_eq!(s.source_tier, SourceTier::DEFAULT);
        assert_eq!(s.depth_scores, BTreeMap::from([(1, 3), (4, 3)]));
    }

    #[test]
    fn test_selection_prefers_scarce_dimension_per_char() {
        let config = ScoringConfig::default();
        let sources = vec![
            scored("https://a.org/dense", 1_000, &[(1, 3), (2, 3)]),
            scored("https://b.org/long", 20_000, &[(1, 3), (2, 3)]),
            scored("https://c.org/empty", 500, &[]),
        ];
        let sel = select_sources(sources, &config);
        assert_eq!(sel.selected[0].url, "https://a.org/dense");
        assert_eq!(sel.selected.len(), 2);
        assert_eq!(sel.not_selected, vec![NotSelected {
            url: "https://c.org/empty".into(),
            reason: NO_SIGNAL_REASON.into(),
        }]);
    }

    #[test]
    fn test_budget_stops_greedy_pick() {
        let config = ScoringConfig {
            content_budget_chars: 10_000,
            ..Default::default()
        };
        let sources = vec![
            scored("https://x.org/big", 6_000, &[(1, 3)]),
            scored("https://y.org/mid", 5_000, &[(1, 3)]),
            scored("https://z.org/small", 3_000, &[(1, 1), (2, 1)]),
        ];
        let sel = select_sources(sources, &config);
        let urls: Vec<&str> = sel.selected.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://z.org/small", "https://y.org/mid"]);
        assert_eq!(sel.total_chars, 8_000);
        assert_eq!(sel.not_selected, vec![NotSelected {
            url: "https://x.org/big".into(),
            reason: EXCLUDED_REASON.into(),
        }]);
    }

    #[test]
    fn test_backfill_takes_small_multi_dimension_sources() {
        let config = ScoringConfig {
            content_budget_chars: 10_000,
            ..Default::default()
        };
        let sources = vec![
            scored("https://a.org/1", 4_000, &[(1, 3), (2, 3), (4, 3)]),
            scored("https://b.org/2", 7_000, &[(7, 3), (8, 3), (10, 3), (11, 3)]),
            scored("https://c.org/3", 2_000, &[(12, 1), (13, 1)]),
        ];
        let sel = select_sources(sources, &config);
        // b ranks above c but no longer fits, which ends the greedy pass.
        let urls: Vec<&str> = sel.selected.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.org/1", "https://c.org/3"]);
        assert_eq!(sel.backfilled, 1);
        assert_eq!(sel.not_selected[0].reason, EXCLUDED_REASON);
    }

    #[test]
    fn test_first_pick_allowed_over_budget() {
        let config = ScoringConfig {
            content_budget_chars: 100,
            ..Default::default()
        };
        let sel = select_sources(vec![scored("https://a.org", 5_000, &[(1, 1)])], &config);
        assert_eq!(sel.selected.len(), 1);
    }

    #[test]
    fn test_domain_penalty_spreads_picks() {
        let config = ScoringConfig::default();
        let mut sources: Vec<Source> = (0..5)
            .map(|i| scored(&format!("https://same.org/{i}"), 1_000, &[(1, 2)]))
            .collect();
        sources.push(scored("https://other.org/x", 1_150, &[(1, 2)]));
        let sel = select_sources(sources, &config);
        let pos = sel.selected.iter().position(|s| s.url == "https://other.org/x").unwrap();
        assert!(pos <= 3, "other domain picked at {pos}");
    }

    #[test]
    fn test_gap_report_formatting() {
        let sel = select_sources(vec![scored("https://a.org", 100, &[(1, 3)])], &ScoringConfig::default());
        let report = format_gap_report(&sel.predicted);
        assert!(report.starts_with("COVERAGE GAP ANALYSIS FROM PRE-RESEARCH:"));
        assert!(report.contains("2. TRUST_CALIBRATION — ZERO_COVERAGE (0 sources, need 7)"));
        assert!(report.contains("1. DECISION_MAKING — CRITICAL_GAP (1 sources, need 7)"));
        assert!(sel.predicted.has_severe_gaps());
    }

    #[tokio::test]
    async fn test_failed_batch_retried_then_zeroed() {
        let completion = ScriptedCompletion::new(vec![
            Err(ServiceError::http("completion", 500, "boom")),
            Ok("no json here".into()),
        ]);
        let input = vec![scored("https://a.org", 10, &[(1, 3)])];
        let out = score_sources(&completion, "Jane Doe", input, &ScoringConfig::default(), 4, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(completion.calls(), 2);
        assert!(out[0].depth_scores.is_empty());
        assert!(out[0].unscored);
    }

    #[tokio::test]
    async fn test_scoring_outage_still_selects_sources() {
        let completion = ScriptedCompletion::new(vec![Ok("garbage".into()), Ok("garbage".into())]);
        let input = vec![
            Source::new("https://a.org/1", "a", "").with_content("x".repeat(3_000)),
            Source::new("https://b.org/2", "b", "").with_content("x".repeat(1_000)),
            Source::new("https://c.org/3", "c", "").with_content("x".repeat(2_000)),
        ];
        let config = ScoringConfig::default();
        let out = score_sources(&completion, "Jane Doe", input, &config, 1, &CancelSignal::never())
            .await
            .unwrap();

        let sel = select_sources(out, &config);
        let urls: Vec<&str> = sel.selected.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://b.org/2", "https://c.org/3", "https://a.org/1"]);
        assert_eq!(sel.unscored_kept, 3);
        assert!(sel.not_selected.is_empty());
    }

    #[test]
    fn test_unscored_sources_rank_after_scored_and_respect_budget() {
        let config = ScoringConfig {
            content_budget_chars: 5_000,
            ..Default::default()
        };
        let mut small = Source::new("https://u.org/small", "u", "").with_content("x".repeat(1_000));
        small.unscored = true;
        let mut big = Source::new("https://u.org/big", "u", "").with_content("x".repeat(4_000));
        big.unscored = true;
        let sources = vec![big, small, scored("https://s.org/scored", 3_000, &[(1, 3)])];

        let sel = select_sources(sources, &config);
        let urls: Vec<&str> = sel.selected.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://s.org/scored", "https://u.org/small"]);
        assert_eq!(sel.not_selected, vec![NotSelected {
            url: "https://u.org/big".into(),
            reason: EXCLUDED_REASON.into(),
        }]);
    }

    #[tokio::test]
    async fn test_scores_matched_by_position_across_batches() {
        let completion = ScriptedCompletion::new(vec![
            Ok(r#"[{"url": "ignored", "source_tier": 1, "depth_scores": {"2": 2}}]"#.into()),
            Ok(r#"[{"source_tier": 5, "depth_scores": {"3": 1}}]"#.into()),
        ]);
        let config = ScoringConfig {
            batch_size: 1,
            ..Default::default()
        };
        let input = vec![
            Source::new("https://a.org", "a", "s"),
            Source::new("https://b.org", "b", "s"),
        ];
        let out = score_sources(&completion, "Jane Doe", input, &config, 1, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(out[0].url, "https://a.org");
        assert_eq!(out[0].source_tier.get(), 1);
        assert_eq!(out[1].depth_scores, BTreeMap::from([(3, 1)]));
    }
}

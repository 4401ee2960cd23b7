//! Pipeline configuration.
//!
//! Every tunable constant of the pipeline lives here, including the
//! similarity thresholds used by merge and dedup. Each section has sane
//! defaults, `with_*` builders, and `DOSSIER_*` environment overrides via
//! [`PipelineConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DossierError, DossierResult};
use crate::retry::RetryPolicy;

/// Thresholds applied when merging batch evidence into the accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeThresholds {
    /// Quotes more similar than this to an existing quote are dropped.
    pub quote_similarity: f64,
    /// Analysis paragraphs more similar than this to an existing one are dropped.
    pub analysis_similarity: f64,
    /// Characters of quote text in the `url|||prefix` fingerprint.
    pub quote_fingerprint_chars: usize,
    /// Prefix length used to dedup patterns and contradictions.
    pub list_prefix_chars: usize,
}

impl Default for MergeThresholds {
    fn default() -> Self {
        MergeThresholds {
            quote_similarity: 0.9,
            analysis_similarity: 0.8,
            quote_fingerprint_chars: 80,
            list_prefix_chars: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Pairwise shingle similarity above which two sources collapse.
    pub content_similarity: f64,
    /// Similarity to reference content at or above which a source is a republish.
    pub reference_similarity: f64,
    /// Minimum content length for fingerprint comparison.
    pub min_fingerprint_chars: usize,
    /// Minimum source content length for the reference-overlap check.
    pub min_reference_source_chars: usize,
    /// Reference documents shorter than this are ignored.
    pub min_reference_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            content_similarity: 0.8,
            reference_similarity: 0.6,
            min_fingerprint_chars: 200,
            min_reference_source_chars: 100,
            min_reference_chars: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningConfig {
    pub batch_size: usize,
    pub min_clean_chars: usize,
    pub large_pdf_chars: usize,
    pub max_tokens: u32,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        ScreeningConfig {
            batch_size: 25,
            min_clean_chars: 100,
            large_pdf_chars: 50_000,
            max_tokens: 4_096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceConfig {
    pub batch_size: usize,
    pub excerpt_head_chars: usize,
    pub excerpt_tail_chars: usize,
    pub seed_excerpt_chars: usize,
    pub max_tokens: u32,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        RelevanceConfig {
            batch_size: 20,
            excerpt_head_chars: 500,
            excerpt_tail_chars: 500,
            seed_excerpt_chars: 1_000,
            max_tokens: 4_096,
        }
    }
}

/// Source domain concentration penalty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainPenalty {
    /// Applies once this many sources from the domain are already selected.
    pub after: usize,
    pub penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub batch_size: usize,
    pub content_budget_chars: usize,
    pub scarcity_cap: f64,
    /// Indexed by the number of already-selected sources of the same tier (last entry repeats).
    pub diversity_bonuses: Vec<f64>,
    pub domain_penalties: Vec<DomainPenalty>,
    /// Backfill candidates need at least this many scored dimensions.
    pub min_backfill_dimensions: usize,
    pub max_tokens: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            batch_size: 18,
            content_budget_chars: 150_000,
            scarcity_cap: 6.0,
            diversity_bonuses: vec![1.3, 1.15, 1.05, 1.0],
            domain_penalties: vec![
                DomainPenalty {
                    after: 3,
                    penalty: 0.30,
                },
                DomainPenalty {
                    after: 5,
                    penalty: 0.60,
                },
            ],
            min_backfill_dimensions: 2,
            max_tokens: 8_192,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub char_ceiling: usize,
    pub max_batches: usize,
    /// Extraction attempts per batch before it is skipped.
    pub attempts: u32,
    pub max_tokens: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            char_ceiling: 30_000,
            max_batches: 3,
            attempts: 2,
            max_tokens: 16_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub wall_clock_cap_secs: u64,
    pub poll_interval_secs: u64,
    pub activity_throttle_secs: u64,
    pub max_tool_calls: u32,
    /// Gap-fill calls attempted when the output does not parse.
    pub gap_fill_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        SynthesisConfig {
            wall_clock_cap_secs: 15 * 60,
            poll_interval_secs: 10,
            activity_throttle_secs: 3,
            max_tool_calls: 20,
            gap_fill_attempts: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl SynthesisConfig {
    pub fn wall_clock_cap(&self) -> Duration {
        Duration::from_secs(self.wall_clock_cap_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn activity_throttle(&self) -> Duration {
        Duration::from_secs(self.activity_throttle_secs)
    }

    pub fn with_wall_clock_cap(mut self, cap: Duration) -> Self {
        self.wall_clock_cap_secs = cap.as_secs();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs();
        self
    }
}

/// In-flight limits for the rolling fan-out windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub search: usize,
    pub fetch: usize,
    pub scoring: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        ConcurrencyConfig {
            search: 3,
            fetch: 8,
            scoring: 4,
        }
    }
}

/// How evidence is synthesized from the selected sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Sequential per-batch extraction plus an optional gap-fill pass.
    #[default]
    Batched,
    /// One long-running synthesis call over all selected sources.
    SingleShot,
}

impl FromStr for SynthesisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "batched" => Ok(SynthesisMode::Batched),
            "single_shot" | "singleshot" => Ok(SynthesisMode::SingleShot),
            other => Err(format!("unknown synthesis mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: SynthesisMode,
    pub screening: ScreeningConfig,
    pub relevance: RelevanceConfig,
    pub dedup: DedupConfig,
    pub scoring: ScoringConfig,
    pub batching: BatchConfig,
    pub merge: MergeThresholds,
    pub synthesis: SynthesisConfig,
    pub concurrency: ConcurrencyConfig,
}

impl PipelineConfig {
    /// Defaults overridden by `DOSSIER_*` environment variables.
    pub fn from_env() -> DossierResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `DOSSIER_*` key.
    pub fn from_lookup<L>(lookup: L) -> DossierResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut c = PipelineConfig::default();
        let get = &lookup;

        override_with(get, "DOSSIER_MODE", &mut c.mode)?;
        override_with(get, "DOSSIER_BATCH_CHAR_CEILING", &mut c.batching.char_ceiling)?;
        override_with(get, "DOSSIER_MAX_BATCHES", &mut c.batching.max_batches)?;
        override_with(get, "DOSSIER_CONTENT_BUDGET_CHARS", &mut c.scoring.content_budget_chars)?;
        override_with(get, "DOSSIER_QUOTE_SIMILARITY", &mut c.merge.quote_similarity)?;
        override_with(get, "DOSSIER_ANALYSIS_SIMILARITY", &mut c.merge.analysis_similarity)?;
        override_with(get, "DOSSIER_CONTENT_SIMILARITY", &mut c.dedup.content_similarity)?;
        override_with(get, "DOSSIER_REFERENCE_SIMILARITY", &mut c.dedup.reference_similarity)?;
        override_with(get, "DOSSIER_SYNTHESIS_CAP_SECS", &mut c.synthesis.wall_clock_cap_secs)?;
        override_with(get, "DOSSIER_POLL_INTERVAL_SECS", &mut c.synthesis.poll_interval_secs)?;
        override_with(get, "DOSSIER_SEARCH_CONCURRENCY", &mut c.concurrency.search)?;
        override_with(get, "DOSSIER_FETCH_CONCURRENCY", &mut c.concurrency.fetch)?;

        c.validate()?;
        Ok(c)
    }

    pub fn with_mode(mut self, mode: SynthesisMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_merge_thresholds(mut self, merge: MergeThresholds) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_batching(mut self, batching: BatchConfig) -> Self {
        self.batching = batching;
        self
    }

    pub fn with_synthesis(mut self, synthesis: SynthesisConfig) -> Self {
        self.synthesis = synthesis;
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Reject values that would make a stage misbehave rather than degrade.
    pub fn validate(&self) -> DossierResult<()> {
        let ratios = [
            ("merge.quote_similarity", self.merge.quote_similarity),
            ("merge.analysis_similarity", self.merge.analysis_similarity),
            ("dedup.content_similarity", self.dedup.content_similarity),
            ("dedup.reference_similarity", self.dedup.reference_similarity),
        ];
        for (key, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, format!("{value} is outside 0.0..=1.0")));
            }
        }

        let positive = [
            ("screening.batch_size", self.screening.batch_size),
            ("relevance.batch_size", self.relevance.batch_size),
            ("scoring.batch_size", self.scoring.batch_size),
            ("batching.char_ceiling", self.batching.char_ceiling),
            ("batching.max_batches", self.batching.max_batches),
            ("concurrency.search", self.concurrency.search),
            ("concurrency.fetch", self.concurrency.fetch),
            ("concurrency.scoring", self.concurrency.scoring),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero".to_string()));
            }
        }

        if self.scoring.diversity_bonuses.is_empty() {
            return Err(invalid("scoring.diversity_bonuses", "must not be empty".to_string()));
        }
        if self.synthesis.poll_interval_secs == 0 {
            return Err(invalid("synthesis.poll_interval_secs", "must be greater than zero".to_string()));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: String) -> DossierError {
    DossierError::Config {
        key: key.to_string(),
        reason,
    }
}

fn override_with<T, G>(get: &G, key: &str, slot: &mut T) -> DossierResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, format!("{raw:?}: {e}")))?;
    }
    Ok(())
}

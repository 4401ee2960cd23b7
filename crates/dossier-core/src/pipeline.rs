//! End-to-end pipeline driver.
//!
//! search → screening → fetch → relevance → dedup → scoring/selection →
//! extraction (batched or single-shot) → gap-fill → render.
//!
//! Every stage degrades instead of failing; the run always produces a
//! dossier, possibly thin. Cancellation is the only early exit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, Instrument};

use crate::batching::{pack_batches, Batch};
use crate::config::SynthesisMode;
use crate::context::RunContext;
use crate::coverage::CoverageMap;
use crate::dedup::{deduplicate, Removal};
use crate::error::DossierResult;
use crate::evidence::{CumulativeEvidence, EvidenceDensity};
use crate::extraction::{self, BatchReport, SynthesisPassReport};
use crate::gather::{fetch_all, search_all, FailedItem, SearchQuery};
use crate::obs;
use crate::progress::{ProgressEvent, ProgressObserver, Stage};
use crate::providers::{Citation, CompletionService, PageFetcher, SearchProvider, SynthesisService, TokenUsage};
use crate::relevance::{filter_relevance, Irrelevant};
use crate::render::render_dossier;
use crate::scoring::{format_gap_report, score_sources, select_sources, NotSelected};
use crate::screening::{screen_sources, ScreenedOut};
use crate::source::{Provenance, Source};

/// Canon document used as the relevance seed when the input carries none.
pub const SEED_DOC: &str = "seed";

/// The external collaborators one run talks to.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub search: &'a dyn SearchProvider,
    pub fetcher: &'a dyn PageFetcher,
    pub completion: &'a dyn CompletionService,
    pub synthesis: &'a dyn SynthesisService,
}

/// What a run starts from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineInput {
    #[serde(default)]
    pub queries: Vec<SearchQuery>,
    /// Pre-verified sources (the subject's own posts, user uploads).
    #[serde(default)]
    pub supplied: Vec<Source>,
    /// Known content already in hand; sources republishing it are dropped.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub seed_document: String,
}

impl PipelineInput {
    pub fn with_queries(mut self, queries: Vec<SearchQuery>) -> Self {
        self.queries = queries;
        self
    }

    /// Supplied sources always bypass screening and relevance.
    pub fn with_supplied(mut self, sources: Vec<Source>) -> Self {
        self.supplied = sources
            .into_iter()
            .map(|s| s.with_provenance(Provenance::UserSupplied).bypassing_screening())
            .collect();
        self
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn with_seed_document(mut self, seed: impl Into<String>) -> Self {
        self.seed_document = seed.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub searched: usize,
    pub supplied: usize,
    pub screened_out: usize,
    pub fetch_failed: usize,
    pub irrelevant: usize,
    pub deduplicated: usize,
    pub scored: usize,
    pub selected: usize,
    pub not_selected: usize,
    pub dropped_by_packing: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub subject: String,
    pub mode: SynthesisMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub counts: StageCounts,
    pub failed_queries: Vec<FailedItem>,
    pub screened_out: Vec<ScreenedOut>,
    pub fetch_failures: Vec<FailedItem>,
    pub irrelevant: Vec<Irrelevant>,
    pub removed: Vec<Removal>,
    pub not_selected: Vec<NotSelected>,
    pub gap_report: String,
    pub batches: Vec<BatchReport>,
    /// Gap-fill pass (batched mode) or the single-shot call.
    pub synthesis: Option<SynthesisPassReport>,
    pub search_count: u32,
    pub citations: Vec<Citation>,
    pub usage: TokenUsage,
    pub coverage: CoverageMap,
    pub density: EvidenceDensity,
    pub evidence: CumulativeEvidence,
    pub dossier: String,
}

impl PipelineReport {
    pub fn total_quotes(&self) -> usize {
        self.evidence.total_quotes()
    }
}

fn stage_done(ctx: &RunContext, stage: Stage, kept: usize, dropped: usize) {
    ctx.emit(ProgressEvent::StageCompleted { stage, kept, dropped });
}

/// Run the full pipeline for `ctx.subject`.
pub async fn run_pipeline(
    ctx: &RunContext,
    services: Services<'_>,
    input: PipelineInput,
) -> DossierResult<PipelineReport> {
    run_stages(ctx, services, input)
        .instrument(obs::run_span(&ctx.run_id))
        .await
}

#[instrument(skip_all, fields(subject = %ctx.subject.name))]
async fn run_stages(
    ctx: &RunContext,
    services: Services<'_>,
    input: PipelineInput,
) -> DossierResult<PipelineReport> {
    let clock = Instant::now();
    obs::emit_run_started(&ctx.run_id, &ctx.subject.name);

    let config = &ctx.config;
    let cancel = &ctx.cancel;
    let subject = &ctx.subject;
    let observer: &dyn ProgressObserver = &**ctx.observer();
    let mut counts = StageCounts {
        supplied: input.supplied.len(),
        ..Default::default()
    };

    ctx.emit(ProgressEvent::StageStarted {
        stage: Stage::Search,
        items: input.queries.len(),
    });
    let searched = search_all(services.search, &input.queries, config.concurrency.search, cancel).await?;
    counts.searched = searched.sources.len();
    stage_done(ctx, Stage::Search, searched.sources.len(), searched.duplicate_hits);

    let mut candidates = input.supplied;
    candidates.extend(searched.sources);

    ctx.emit(ProgressEvent::StageStarted {
        stage: Stage::Screening,
        items: candidates.len(),
    });
    let screened = screen_sources(services.completion, subject, candidates, &config.screening, cancel).await?;
    counts.screened_out = screened.killed.len();
    stage_done(ctx, Stage::Screening, screened.accepted.len(), screened.killed.len());

    cancel.check()?;
    ctx.emit(ProgressEvent::StageStarted {
        stage: Stage::Fetch,
        items: screened.accepted.len(),
    });
    let fetched = fetch_all(services.fetcher, screened.accepted, config.concurrency.fetch, cancel).await?;
    counts.fetch_failed = fetched.failed.len();
    stage_done(ctx, Stage::Fetch, fetched.fetched.len(), fetched.failed.len());

    let seed = if input.seed_document.is_empty() {
        ctx.canon.get(SEED_DOC).unwrap_or_default()
    } else {
        input.seed_document.as_str()
    };
    ctx.emit(ProgressEvent::StageStarted {
        stage: Stage::Relevance,
        items: fetched.fetched.len(),
    });
    let relevant = filter_relevance(services.completion, subject, seed, fetched.fetched, &config.relevance, cancel).await?;
    counts.irrelevant = relevant.failed.len();
    stage_done(ctx, Stage::Relevance, relevant.passed.len(), relevant.failed.len());

    cancel.check()?;
    let deduped = deduplicate(relevant.passed, &input.references, &config.dedup);
    counts.deduplicated = deduped.removed.len();
    stage_done(ctx, Stage::Dedup, deduped.survivors.len(), deduped.removed.len());

    ctx.emit(ProgressEvent::StageStarted {
        stage: Stage::Scoring,
        items: deduped.survivors.len(),
    });
    let scored = score_sources(
        services.completion,
        &subject.name,
        deduped.survivors,
        &config.scoring,
        config.concurrency.scoring,
        cancel,
    )
    .await?;
    counts.scored = scored.len();
    let selection = select_sources(scored, &config.scoring);
    counts.selected = selection.selected.len();
    counts.not_selected = selection.not_selected.len();
    stage_done(ctx, Stage::Scoring, selection.selected.len(), selection.not_selected.len());
    let gap_report = format_gap_report(&selection.predicted);

    cancel.check()?;
    let mut batches = Vec::new();
    let (evidence, synthesis) = match config.mode {
        SynthesisMode::Batched => {
            let packing = pack_batches(selection.selected, &config.batching);
            counts.dropped_by_packing = packing.dropped.len();
            ctx.emit(ProgressEvent::StageStarted {
                stage: Stage::Extraction,
                items: packing.batches.len(),
            });
            let (evidence, reports) = extraction::extract_batches(
                services.completion,
                subject,
                &packing.batches,
                &gap_report,
                CumulativeEvidence::empty(),
                &config.batching,
                &config.merge,
                cancel,
                observer,
            )
            .await?;
            let merged = reports.iter().filter(|r| r.outcome.is_merged()).count();
            stage_done(ctx, Stage::Extraction, merged, reports.len() - merged);
            batches = reports;

            ctx.emit(ProgressEvent::StageStarted {
                stage: Stage::GapFill,
                items: CoverageMap::from_evidence(&evidence).severe_gaps().count(),
            });
            let (evidence, gap_fill) = extraction::gap_fill(
                services.synthesis,
                subject,
                evidence,
                &config.synthesis,
                &config.merge,
                cancel,
                observer,
            )
            .await?;
            let filled = gap_fill.as_ref().map_or(0, |r| usize::from(r.outcome.is_merged()));
            stage_done(ctx, Stage::GapFill, filled, 0);
            (evidence, gap_fill)
        }
        SynthesisMode::SingleShot => {
            let total_chars = selection.selected.iter().map(Source::char_count).sum();
            let batch = Batch {
                batch_number: 1,
                sources: selection.selected,
                total_chars,
            };
            ctx.emit(ProgressEvent::StageStarted {
                stage: Stage::Extraction,
                items: 1,
            });
            let (evidence, report) = extraction::single_shot(
                services.synthesis,
                subject,
                &batch,
                &gap_report,
                CumulativeEvidence::empty(),
                &config.synthesis,
                &config.merge,
                cancel,
                observer,
            )
            .await?;
            let merged = usize::from(report.outcome.is_merged());
            stage_done(ctx, Stage::Extraction, merged, 1 - merged);
            (evidence, Some(report))
        }
    };

    let dossier = render_dossier(&evidence);
    let coverage = CoverageMap::from_evidence(&evidence);
    stage_done(ctx, Stage::Render, evidence.covered_dimensions(), coverage.severe_gaps().count());

    let (search_count, citations, usage) = synthesis
        .as_ref()
        .map(|s| (s.search_count, s.citations.clone(), s.usage))
        .unwrap_or_default();
    let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
    obs::emit_run_finished(&ctx.run_id, duration_ms, evidence.total_quotes(), evidence.covered_dimensions());
    info!(
        event = "run.summary",
        selected = counts.selected,
        batches = batches.len(),
        density = ?evidence.density(),
        search_count = search_count,
    );

    Ok(PipelineReport {
        run_id: ctx.run_id.clone(),
        subject: subject.name.clone(),
        mode: config.mode,
        started_at: ctx.started_at,
        finished_at: Utc::now(),
        duration_ms,
        counts,
        failed_queries: searched.failed_queries,
        screened_out: screened.killed,
        fetch_failures: fetched.failed,
        irrelevant: relevant.failed,
        removed: deduped.removed,
        not_selected: selection.not_selected,
        gap_report,
        batches,
        synthesis,
        search_count,
        citations,
        usage,
        coverage,
        density: evidence.density(),
        evidence,
        dossier,
    })
}

//! Dossier Core Library
//!
//! Evidence collection and synthesis: screening, relevance filtering,
//! deduplication, dimension scoring, batched evidence accumulation and the
//! long-running synthesis orchestrator. Re-exports the main entry points.

pub mod batching;
pub mod cancel;
pub mod config;
pub mod context;
pub mod coverage;
pub mod dedup;
pub mod dimensions;
pub mod error;
pub mod evidence;
pub mod extract;
pub mod extraction;
pub mod fakes;
pub mod gather;
pub mod obs;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod relevance;
pub mod render;
pub mod retry;
pub mod scoring;
pub mod screening;
pub mod source;
pub mod subject;
pub mod synthesis;
pub mod telemetry;
pub mod text;

pub use batching::{format_batch_sources, pack_batches, Batch, Packing};
pub use cancel::{CancelHandle, CancelSignal};
pub use config::{
    BatchConfig, ConcurrencyConfig, DedupConfig, MergeThresholds, PipelineConfig, RelevanceConfig, ScoringConfig,
    ScreeningConfig, SynthesisConfig, SynthesisMode,
};
pub use context::{CanonLibrary, RunContext};
pub use coverage::{CoverageEntry, CoverageMap, CoverageStatus};
pub use dedup::{deduplicate, normalize_url, DedupOutcome, Removal};
pub use dimensions::{Dimension, InvestmentTier, DIMENSIONS};
pub use error::{DossierError, DossierResult, ServiceError, ServiceResult};
pub use evidence::{merge_evidence, CumulativeEvidence, DimensionEvidence, EvidenceDensity, Quote, QuoteDepth, Strength};
pub use extract::{parse_evidence, ParseOutcome, ParseStrategy};
pub use extraction::{extract_batches, gap_fill, single_shot, BatchReport, PassOutcome, SynthesisPassReport};
pub use gather::{fetch_all, search_all, SearchQuery};
pub use pipeline::{run_pipeline, PipelineInput, PipelineReport, Services};
pub use progress::{ChannelObserver, NoopObserver, ProgressEvent, ProgressObserver, SharedObserver, Stage};
pub use providers::{
    Citation, CompletionOptions, CompletionService, JobHandle, JobSnapshot, JobStatus, PageFetcher, SearchHit,
    SearchProvider, SynthesisEvent, SynthesisOutput, SynthesisRequest, SynthesisService, SynthesisStream,
    SynthesisTool, TokenUsage,
};
pub use relevance::filter_relevance;
pub use render::render_dossier;
pub use retry::{with_retry, RetryPolicy};
pub use scoring::{format_gap_report, score_sources, select_sources, Selection};
pub use screening::screen_sources;
pub use source::{Attribution, KillReason, Provenance, QueryCategory, Source, SourceTier};
pub use subject::SubjectProfile;
pub use synthesis::{SynthesisOrchestrator, SynthesisOutcome, SynthesisResult, SynthesisState};

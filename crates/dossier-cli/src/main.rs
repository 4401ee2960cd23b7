//! Dossier CLI
//!
//! The `dossier` command runs the evidence pipeline for one subject and
//! works with saved evidence files.
//!
//! ## Commands
//!
//! - `run`: Search, screen, score and extract evidence, then render the dossier
//! - `dimensions`: List the behavioral dimension catalog
//! - `render`: Render a dossier from saved evidence JSON
//! - `merge`: Merge evidence files in order
//! - `coverage`: Show per-dimension coverage for saved evidence

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dossier_core::telemetry::init_tracing;
use dossier_core::{
    format_gap_report, merge_evidence, render_dossier, run_pipeline, CancelHandle, CanonLibrary, ChannelObserver,
    CoverageMap, CumulativeEvidence, MergeThresholds, PipelineConfig, PipelineInput, PipelineReport, ProgressEvent,
    RunContext, SearchQuery, Services, Source, SubjectProfile, SynthesisMode, DIMENSIONS,
};
use dossier_providers::{AnthropicClient, ResponsesClient, TavilyClient};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "dossier")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Behavioral evidence collection and synthesis", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for a subject
    Run {
        /// Subject profile (JSON)
        #[arg(short, long)]
        subject: PathBuf,

        /// Search queries: JSON array of strings or {query, category} objects
        #[arg(short, long)]
        queries: Option<PathBuf>,

        /// Pre-verified sources (JSON array); these skip screening
        #[arg(long)]
        sources: Option<PathBuf>,

        /// Known content files; sources republishing them are dropped
        #[arg(long)]
        reference: Vec<PathBuf>,

        /// Directory of canon documents (.md/.txt), e.g. seed.md
        #[arg(long)]
        canon: Option<PathBuf>,

        /// Synthesis mode (batched or single-shot); overrides DOSSIER_MODE
        #[arg(long)]
        mode: Option<SynthesisMode>,

        /// Write the dossier here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the full run report (JSON) here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List the behavioral dimension catalog
    Dimensions,

    /// Render a dossier from saved evidence JSON
    Render {
        /// Evidence file (JSON)
        evidence: PathBuf,

        /// Write the dossier here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge evidence files in order, earlier files first
    Merge {
        /// Evidence files (JSON)
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,

        /// Write the merged evidence here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show per-dimension coverage for saved evidence
    Coverage {
        /// Evidence file (JSON)
        evidence: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            subject,
            queries,
            sources,
            reference,
            canon,
            mode,
            output,
            report,
        } => {
            let files = RunFiles {
                subject,
                queries,
                sources,
                references: reference,
                canon,
            };
            cmd_run(&files, mode, output.as_deref(), report.as_deref(), cli.json).await
        }
        Commands::Dimensions => {
            println!("{}", cmd_dimensions(cli.json)?);
            Ok(())
        }
        Commands::Render { evidence, output } => {
            let dossier = cmd_render(&evidence)?;
            write_output(&dossier, output.as_deref())
        }
        Commands::Merge { files, output } => {
            let config = PipelineConfig::from_env().context("Invalid DOSSIER_* configuration")?;
            let merged = cmd_merge(&files, &config.merge)?;
            write_output(&serde_json::to_string_pretty(&merged)?, output.as_deref())
        }
        Commands::Coverage { evidence } => {
            println!("{}", cmd_coverage(&evidence, cli.json)?);
            Ok(())
        }
    }
}

/// Input files for a pipeline run
struct RunFiles {
    subject: PathBuf,
    queries: Option<PathBuf>,
    sources: Option<PathBuf>,
    references: Vec<PathBuf>,
    canon: Option<PathBuf>,
}

/// One entry of a queries file.
#[derive(Deserialize)]
#[serde(untagged)]
enum QueryEntry {
    Plain(String),
    Full(SearchQuery),
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
            info!("Wrote {:?}", path);
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn load_evidence(path: &Path) -> Result<CumulativeEvidence> {
    let raw = read_file(path)?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse evidence JSON in {:?}", path))
}

fn load_queries(path: &Path) -> Result<Vec<SearchQuery>> {
    let raw = read_file(path)?;
    let entries: Vec<QueryEntry> =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse queries in {:?}", path))?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            QueryEntry::Plain(query) => SearchQuery::new(query),
            QueryEntry::Full(query) => query,
        })
        .filter(|q| !q.query.trim().is_empty())
        .collect())
}

/// Queries used when none are supplied: the subject's own voice first.
fn default_queries(subject: &SubjectProfile) -> Vec<SearchQuery> {
    let name = &subject.name;
    let mut queries = vec![
        SearchQuery::new(format!("\"{name}\" interview")),
        SearchQuery::new(format!("\"{name}\" podcast")),
        SearchQuery::new(format!("\"{name}\" keynote OR talk OR panel")),
        SearchQuery::new(format!("\"{name}\" profile")),
    ];
    if let Some(employer) = &subject.current_employer {
        queries.push(SearchQuery::new(format!("\"{name}\" {employer}")));
    }
    queries
}

/// Build the subject and pipeline input from the run's files.
fn load_run_input(files: &RunFiles) -> Result<(SubjectProfile, PipelineInput, CanonLibrary)> {
    let subject = SubjectProfile::from_json(&read_file(&files.subject)?)
        .with_context(|| format!("Invalid subject profile in {:?}", files.subject))?;

    let queries = match &files.queries {
        Some(path) => load_queries(path)?,
        None => default_queries(&subject),
    };

    let supplied: Vec<Source> = match &files.sources {
        Some(path) => serde_json::from_str(&read_file(path)?)
            .with_context(|| format!("Failed to parse sources in {:?}", path))?,
        None => Vec::new(),
    };

    let references = files
        .references
        .iter()
        .map(|path| read_file(path))
        .collect::<Result<Vec<_>>>()?;

    let canon = match &files.canon {
        Some(dir) => {
            CanonLibrary::load_dir(dir).with_context(|| format!("Failed to load canon documents from {:?}", dir))?
        }
        None => CanonLibrary::new(),
    };

    let input = PipelineInput::default()
        .with_queries(queries)
        .with_supplied(supplied)
        .with_references(references);
    Ok((subject, input, canon))
}

fn log_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::StageStarted { stage, items } => info!("{stage}: starting with {items} items"),
        ProgressEvent::StageCompleted { stage, kept, dropped } => {
            info!("{stage}: kept {kept}, dropped {dropped}")
        }
        ProgressEvent::BatchStarted {
            batch_number,
            total_batches,
            sources,
            chars,
        } => info!("Batch {batch_number}/{total_batches}: {sources} sources, ~{}K chars", chars / 1000),
        ProgressEvent::BatchMerged {
            batch_number,
            total_quotes,
            covered_dimensions,
        } => info!("Batch {batch_number} merged: {total_quotes} quotes across {covered_dimensions} dimensions"),
        ProgressEvent::Activity { label, snapshot } => info!(
            "{label}: {} searches, {} pages, {}s elapsed",
            snapshot.searches, snapshot.page_visits, snapshot.elapsed_secs
        ),
    }
}

/// Run the pipeline against the given services, forwarding progress to the log.
async fn execute_run(ctx: RunContext, services: Services<'_>, input: PipelineInput) -> Result<PipelineReport> {
    let (observer, mut events) = ChannelObserver::new();
    let ctx = ctx.with_observer(Arc::new(observer));
    let progress = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_progress(&event);
        }
    });

    let result = run_pipeline(&ctx, services, input).await;
    // Dropping the context closes the progress channel.
    drop(ctx);
    let _ = progress.await;

    result.context("Pipeline run failed")
}

fn summarize(report: &PipelineReport) -> String {
    let mut lines = vec![
        format!("Run {} for {}", report.run_id, report.subject),
        format!(
            "Sources: {} searched, {} supplied, {} selected",
            report.counts.searched, report.counts.supplied, report.counts.selected
        ),
        format!(
            "Evidence: {} quotes, {} of {} dimensions, density {:?}",
            report.total_quotes(),
            report.evidence.covered_dimensions(),
            DIMENSIONS.len(),
            report.density
        ),
        format!("Duration: {:.1}s", report.duration_ms as f64 / 1000.0),
    ];
    let gaps: Vec<String> = report
        .coverage
        .severe_gaps()
        .map(|e| format!("{}. {}", e.dimension.id, e.key))
        .collect();
    if !gaps.is_empty() {
        lines.push(format!("Remaining gaps: {}", gaps.join(", ")));
    }
    lines.join("\n")
}

/// Run the full pipeline with HTTP providers configured from the environment
async fn cmd_run(
    files: &RunFiles,
    mode: Option<SynthesisMode>,
    output: Option<&Path>,
    report_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let (subject, input, canon) = load_run_input(files)?;
    let mut config = PipelineConfig::from_env().context("Invalid DOSSIER_* configuration")?;
    if let Some(mode) = mode {
        config = config.with_mode(mode);
    }

    let completion = AnthropicClient::from_env().context("Completion provider is not configured")?;
    let web = TavilyClient::from_env().context("Search provider is not configured")?;
    let synthesis = ResponsesClient::from_env().context("Synthesis provider is not configured")?;
    let services = Services {
        search: &web,
        fetcher: &web,
        completion: &completion,
        synthesis: &synthesis,
    };

    let (handle, signal) = CancelHandle::new();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            handle.cancel();
        }
    });

    info!("Researching {}", subject.name);
    let ctx = RunContext::new(subject, config).with_canon(canon).with_cancel(signal);
    let result = execute_run(ctx, services, input).await;
    interrupt.abort();
    let report = result?;

    write_output(&report.dossier, output)?;
    if let Some(path) = report_path {
        let body = serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
        std::fs::write(path, body).with_context(|| format!("Failed to write {:?}", path))?;
    }
    if json {
        eprintln!(
            "{}",
            serde_json::json!({
                "run_id": report.run_id,
                "counts": report.counts,
                "total_quotes": report.total_quotes(),
                "covered_dimensions": report.evidence.covered_dimensions(),
                "density": report.density,
                "duration_ms": report.duration_ms,
            })
        );
    } else {
        eprintln!("{}", summarize(&report));
    }
    Ok(())
}

/// List the dimension catalog
fn cmd_dimensions(json: bool) -> Result<String> {
    if json {
        let dims: Vec<serde_json::Value> = DIMENSIONS
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "key": d.key,
                    "label": d.label,
                    "tier": d.tier.to_string(),
                    "target": d.target(),
                    "description": d.description,
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&dims)?);
    }

    let mut lines = vec![format!("{:<4} {:<28} {:<8} {:>6}", "ID", "KEY", "TIER", "TARGET")];
    for d in DIMENSIONS.iter() {
        lines.push(format!("{:<4} {:<28} {:<8} {:>6}", d.id, d.key, d.tier.to_string(), d.target()));
    }
    Ok(lines.join("\n"))
}

/// Render a dossier from saved evidence
fn cmd_render(evidence_path: &Path) -> Result<String> {
    let evidence = load_evidence(evidence_path)?;
    Ok(render_dossier(&evidence))
}

/// Merge evidence files left to right
fn cmd_merge(files: &[PathBuf], thresholds: &MergeThresholds) -> Result<CumulativeEvidence> {
    let mut merged = CumulativeEvidence::empty();
    for path in files {
        let batch = load_evidence(path)?;
        merged = merge_evidence(&merged, &batch, thresholds);
        info!(
            "Merged {:?}: {} quotes across {} dimensions",
            path,
            merged.total_quotes(),
            merged.covered_dimensions()
        );
    }
    Ok(merged)
}

/// Coverage table (or JSON) plus the gap report for saved evidence
fn cmd_coverage(evidence_path: &Path, json: bool) -> Result<String> {
    let evidence = load_evidence(evidence_path)?;
    let coverage = CoverageMap::from_evidence(&evidence);
    if json {
        return Ok(serde_json::to_string_pretty(&coverage)?);
    }

    let mut lines = vec![format!(
        "{:<4} {:<28} {:>6} {:>6}  {:<16} {}",
        "ID", "KEY", "COUNT", "TARGET", "STATUS", "STRENGTH"
    )];
    for e in coverage.entries() {
        lines.push(format!(
            "{:<4} {:<28} {:>6} {:>6}  {:<16} {}",
            e.dimension.id,
            e.key,
            e.coverage_count,
            e.target,
            e.status.to_string(),
            e.strength
        ));
    }
    lines.push(String::new());
    lines.push(format_gap_report(&coverage));
    Ok(lines.join("\n"))
}

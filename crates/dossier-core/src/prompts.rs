//! Prompt builders for every model-facing stage.
//!
//! Builders are pure string functions so tests and the CLI can render a
//! prompt without any service attached.

use crate::dimensions::{self, DIMENSIONS};
use crate::source::Source;
use crate::subject::SubjectProfile;
use crate::text::{head_tail, take_chars};

pub const SCREENING_SYSTEM: &str = "You are screening research sources for person identity and attribution. Return JSON only.";
pub const RELEVANCE_SYSTEM: &str = "You are filtering research sources for relevance. Return JSON only.";
pub const SCORING_SYSTEM: &str = "You are scoring research sources for behavioral evidence. Return JSON only.";

/// Characters of each source shown to the screening classifier.
const SCREENING_EXCERPT_CHARS: usize = 800;

const ATTRIBUTION_GUIDE: &str = r#"SOURCE ATTRIBUTION:
- "target_authored" — Direct voice. Quote the subject's own words.
- "target_coverage" — Third-party coverage. Quote only passages where the subject is directly quoted or their specific actions are described.
- "institutional_inference" — What the org did during the subject's tenure, in their area of responsibility. Extract the institutional action. Tag as institutional inference.
- "target_reshare" — Extract ONLY the subject's original commentary."#;

const REGISTER_GUIDE: &str = "ANALYTICAL REGISTER: Write what the behavior looks like in the room and what it means for someone sitting across the table. Do not write personality descriptions or academic behavioral analysis.";

const JSON_ONLY: &str = "Return ONLY the JSON object. No markdown fences, no commentary before or after.";

/// Output schema for evidence extraction, including keys, strength rules and depth scale.
pub fn evidence_schema() -> String {
    let targets = format!(
        "TARGETS: HIGH tier = {}, MEDIUM tier = {}, LOW tier = {}",
        dimensions::InvestmentTier::High.target(),
        dimensions::InvestmentTier::Medium.target(),
        dimensions::InvestmentTier::Low.target(),
    );
    format!(
        r#"{{
  "dimensions": {{
    "1_DECISION_MAKING": {{
      "quotes": [
        {{ "text": "Exact quote or passage (50-300 words)", "source_url": "https://...", "depth": 3 }}
      ],
      "analysis": "Cross-source patterns, contradictions and conditional flags for this dimension, in behavioral register.",
      "coverage_count": 1,
      "strength": "THIN"
    }}
  }},
  "cross_source_patterns": ["Pattern description citing multiple sources"],
  "contradictions": ["Stated vs observed behavior, with source citations"],
  "sources_processed": ["https://source1.com/article"]
}}

DIMENSION KEYS (use these exact strings):
{keys}

STRENGTH VALUES — compute from quote count:
- "ZERO": 0 quotes
- "THIN": below 50% of target for this dimension's tier
- "MODERATE": 50-99% of target
- "STRONG": at or above target

{targets}

DEPTH SCALE for each quote:
  1 = Mention — a fact without behavioral detail
  2 = Passage — a paragraph describing a decision/action with context
  3 = Rich evidence — direct quotes showing how they think, behavior under pressure"#,
        keys = dimensions::all_map_keys().join(", "),
        targets = targets,
    )
}

fn subject_json(subject: &SubjectProfile) -> String {
    serde_json::to_string_pretty(subject).unwrap_or_else(|_| subject.name.clone())
}

/// Batched identity + attribution classification.
pub fn screening_prompt(subject: &SubjectProfile, batch: &[Source]) -> String {
    let entries: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[{i}] URL: {}\nTitle: {}\nQuery: {}\nExcerpt: {}",
                s.url,
                if s.title.is_empty() { "Untitled" } else { &s.title },
                s.query.as_deref().unwrap_or("unknown"),
                take_chars(s.text(), SCREENING_EXCERPT_CHARS),
            )
        })
        .collect();

    format!(
        r#"Screen these {n} sources about {name}.

SUBJECT NAME VARIANTS: {variants}

CAREER TIMELINE:
{timeline}

For each source decide:
(a) PERSON: is it about this {name}, not someone who shares the name?
(b) ATTRIBUTION: how does the content relate to the subject?
  - "target_authored": written or spoken by the subject
  - "target_coverage": third party describing or quoting the subject
  - "institutional_inference": about an organization during the subject's tenure, in their area of responsibility
  - "target_reshare": the subject sharing someone else's content with commentary

KILL a source when:
  - "wrong_person": it is about a different person
  - "directory_listing": it is a people-search, directory or contact-data page
  - "passive_interaction": the subject only appears as a name in a list, a like, a citation or an attendee roll
  - "wrong_attribution": words or actions are attributed to the subject that belong to someone else

SOURCES:
{entries}

Output as a JSON array, one object per source:
[
  {{ "index": 0, "decision": "KEEP", "attribution": "target_authored", "reason": "Op-ed written by the subject" }},
  {{ "index": 1, "decision": "KEEP", "attribution": "institutional_inference", "institutional_context": "Program launched during subject's tenure as VP", "reason": "Org action in subject's area" }},
  {{ "index": 2, "decision": "KILL", "kill_reason": "wrong_person", "reason": "About a different person with the same name" }}
]"#,
        n = batch.len(),
        name = subject.name,
        variants = subject.name_variants().join(", "),
        timeline = subject.career_timeline(),
        entries = entries.join("\n\n---\n\n"),
    )
}

/// Batched relevance check against the career timeline.
pub fn relevance_prompt(
    subject: &SubjectProfile,
    seed_excerpt: &str,
    batch: &[Source],
    head: usize,
    tail: usize,
) -> String {
    let entries: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let context = s
                .institutional_context
                .as_deref()
                .map(|c| format!("Institutional context: {c}\n"))
                .unwrap_or_default();
            format!(
                "[{i}] URL: {}\nTitle: {}\nAttribution tag: {}\n{context}Content excerpt:\n{}",
                s.url,
                if s.title.is_empty() { "Untitled" } else { &s.title },
                s.attribution.map(|a| a.as_str()).unwrap_or("none"),
                head_tail(s.text(), head, tail),
            )
        })
        .collect();

    format!(
        r#"You are a relevance filter for a behavioral profiling research system. Decide whether each source is relevant to the research subject.

SUBJECT: {name}

CAREER TIMELINE:
{timeline}

SEED DOCUMENT CONTEXT:
{seed}

A source is RELEVANT if ANY of the following are true:
(a) It is about the subject: mentions them, quotes them, describes their actions
(b) It is authored by the subject: their blog, op-ed or post
(c) It is about an organization, program, initiative or policy the subject was involved with during their tenure there. The subject does NOT need to be named for this criterion.

A source is NOT RELEVANT if:
- It is about a different person with a similar name
- It is about an organization the subject was never affiliated with
- It covers an affiliated organization OUTSIDE the subject's tenure dates
- It is a generic industry article with no connection to the subject's work, organizations or programs

Do NOT reject sources simply because the subject's name is absent. Check the career timeline.

SOURCES TO EVALUATE:

{entries}

Return JSON:
{{
  "results": [
    {{ "index": 0, "relevant": true, "reason": "About subject's program during their tenure" }},
    {{ "index": 1, "relevant": false, "reason": "Different organization not in the career timeline" }}
  ]
}}

Every source must appear in results. For each, give a brief reason."#,
        name = subject.name,
        timeline = subject.career_timeline(),
        seed = if seed_excerpt.trim().is_empty() { "None provided." } else { seed_excerpt },
        entries = entries.join("\n\n---\n\n"),
    )
}

/// Depth scoring of a batch on all 25 dimensions.
pub fn scoring_prompt(subject_name: &str, batch: &[Source]) -> String {
    let entries: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let context = s
                .institutional_context
                .as_deref()
                .map(|c| format!("Institutional Context: {c}\n"))
                .unwrap_or_default();
            format!(
                "### Source {}\nURL: {}\nTitle: {}\nAttribution: {}\n{context}\n{}",
                i + 1,
                s.url,
                if s.title.is_empty() { "Untitled" } else { &s.title },
                s.attribution.map(|a| a.as_str()).unwrap_or("unknown"),
                s.text(),
            )
        })
        .collect();

    let dims: Vec<String> = DIMENSIONS
        .iter()
        .map(|d| format!("{:>2}. {} — {}", d.id, d.key, d.label))
        .collect();

    format!(
        r#"You are scoring sources for a behavioral profiling system. For each source below, read the full content and score how much behavioral evidence it contains on each of the 25 dimensions listed.

SUBJECT: {subject_name}

DEPTH SCALE (integer 0-3, per dimension, per source):
  0 = No evidence for this dimension
  1 = Mention — a fact without behavioral detail
  2 = Passage — a paragraph describing a decision, action, or behavioral moment with context
  3 = Rich evidence — direct quotes showing how they think, observable behavior under pressure, or multiple data points

Score based on what the content ACTUALLY CONTAINS. Do not infer.

THE 25 DIMENSIONS:
{dims}

ALSO CLASSIFY EACH SOURCE INTO A SOURCE TIER:
  Tier 1: Podcast/interview/video, unscripted voice
  Tier 2: Press profile, journalist coverage, third-party analysis
  Tier 3: Self-authored (op-eds, posts, blog)
  Tier 4: Institutional evidence during tenure (inferential)
  Tier 5: Structural records (board filings, annual returns, registries)

SOURCES TO SCORE:
{entries}

OUTPUT — JSON array, one object per source, in the same order:
[
  {{ "url": "https://example.com/article", "source_tier": 2, "depth_scores": {{ "1": 2, "4": 3, "8": 1 }} }}
]

Only include dimensions with non-zero scores in depth_scores. Every source must appear in the output."#,
        dims = dims.join("\n"),
        entries = entries.join("\n\n---\n\n"),
    )
}

/// Developer message for the first extraction batch.
pub fn first_batch_message(subject: &SubjectProfile, sources: usize, gap_report: &str) -> String {
    format!(
        r#"You are a behavioral research analyst producing a structured evidence dossier on {name}. Your output feeds a downstream profiling system.

TASK: Read every pre-fetched source. Extract behavioral evidence as key quotes (50-300 words). Tag each quote to behavioral dimensions. Identify cross-source patterns and contradictions.

This is BATCH 1 of a multi-batch extraction. You are processing the highest-signal sources first. Later batches will receive your accumulated evidence and build on it.

{register}

{attribution}

BEHAVIORAL DIMENSIONS:
{dimensions}

{gap_report}

CANONICAL BIOGRAPHICAL DATA:
{bio}

YOU MUST read every one of the {sources} pre-fetched sources and extract all behavioral evidence.

OUTPUT FORMAT — Return valid JSON matching this schema:
{schema}

{json_only}"#,
        name = subject.name,
        register = REGISTER_GUIDE,
        attribution = ATTRIBUTION_GUIDE,
        dimensions = dimensions::format_for_prompt(),
        bio = subject_json(subject),
        schema = evidence_schema(),
        json_only = JSON_ONLY,
    )
}

/// Developer message for extraction batches after the first.
pub fn next_batch_message(subject: &SubjectProfile, batch_number: usize, sources: usize, coverage: &str) -> String {
    format!(
        r#"You are a behavioral research analyst continuing a multi-batch extraction on {name}. This is BATCH {batch_number}.

CONTEXT: Previous batches have already extracted evidence from higher-signal sources. The accumulated evidence and current coverage map are provided in the user message. You will receive {sources} new sources to process.

YOUR JOB FOR THIS BATCH:
1. Read all {sources} new sources
2. Extract behavioral evidence as key quotes (50-300 words each)
3. Focus on CONFIRMING patterns, CONTRADICTING prior findings, and FILLING dimensions with ZERO or THIN coverage
4. For dimensions already at STRONG coverage, only extract evidence that contradicts or meaningfully extends existing findings
5. Flag contradictions between this batch's evidence and prior batches

{register}

{coverage}

Dimensions marked ZERO_COVERAGE or CRITICAL_GAP need the most attention.

{attribution}

BEHAVIORAL DIMENSIONS:
{dimensions}

CANONICAL BIOGRAPHICAL DATA:
{bio}

OUTPUT FORMAT — Return valid JSON matching this schema:
{schema}

IMPORTANT: Your output should contain ONLY the NEW evidence from this batch's sources. Do not repeat quotes already in the accumulated evidence.

{json_only}"#,
        name = subject.name,
        register = REGISTER_GUIDE,
        attribution = ATTRIBUTION_GUIDE,
        dimensions = dimensions::format_for_prompt(),
        bio = subject_json(subject),
        schema = evidence_schema(),
        json_only = JSON_ONLY,
    )
}

/// User message for batch N ≥ 2: accumulated evidence followed by the new sources.
pub fn next_batch_user_message(accumulated_json: &str, batch_sources: &str) -> String {
    format!(
        "ACCUMULATED EVIDENCE FROM PRIOR BATCHES:\n{accumulated_json}\n\n---\n\nNEW SOURCES FOR THIS BATCH:\n{batch_sources}"
    )
}

/// Developer message for the web-search gap-fill pass.
pub fn gap_fill_message(subject: &SubjectProfile, coverage: &str, max_searches: u32) -> String {
    format!(
        r#"You are a behavioral research analyst performing a final gap-fill pass on {name}. No pre-fetched sources, only web search.

CONTEXT: Source extraction is complete. The accumulated evidence and current coverage map are provided.

YOUR JOB:
1. Review the coverage map for dimensions with ZERO_COVERAGE, CRITICAL_GAP, or THIN strength
2. Conduct targeted web searches for those specific gaps (no more than {max_searches} searches)
3. Extract behavioral evidence from any useful results
4. Do NOT search for dimensions already at STRONG or MODERATE coverage unless you see a contradiction
5. If a search returns nothing useful, report the gap honestly

{register}

{coverage}

BEHAVIORAL DIMENSIONS:
{dimensions}

CANONICAL BIOGRAPHICAL DATA:
{bio}

OUTPUT FORMAT — Return valid JSON matching this schema:
{schema}

Your output should contain ONLY the NEW evidence from gap-fill searches.

{json_only}"#,
        name = subject.name,
        register = REGISTER_GUIDE,
        dimensions = dimensions::format_for_prompt(),
        bio = subject_json(subject),
        schema = evidence_schema(),
        json_only = JSON_ONLY,
    )
}

pub fn gap_fill_user_message(accumulated_json: &str) -> String {
    format!("ACCUMULATED EVIDENCE:\n{accumulated_json}")
}

/// Developer message for single-shot synthesis over every selected source.
pub fn single_shot_message(subject: &SubjectProfile, sources: usize, gap_report: &str, max_searches: u32) -> String {
    format!(
        r#"You are a behavioral research analyst producing a structured evidence dossier on {name}.

You have {sources} pre-fetched sources. Read each one in full and extract all behavioral evidence before conducting any web searches. After that, run a LIMITED round of searches (no more than {max_searches}) targeting the gaps below.

{register}

{attribution}

BEHAVIORAL DIMENSIONS:
{dimensions}

{gap_report}

CANONICAL BIOGRAPHICAL DATA:
{bio}

OUTPUT FORMAT — Return valid JSON matching this schema:
{schema}

{json_only}"#,
        name = subject.name,
        register = REGISTER_GUIDE,
        attribution = ATTRIBUTION_GUIDE,
        dimensions = dimensions::format_for_prompt(),
        bio = subject_json(subject),
        schema = evidence_schema(),
        json_only = JSON_ONLY,
    )
}

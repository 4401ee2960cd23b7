//! Plain-text dossier rendering of accumulated evidence.

use std::sync::OnceLock;

use regex::Regex;

use crate::evidence::CumulativeEvidence;

fn filler_line() -> Option<&'static Regex> {
    static FILLER: OnceLock<Option<Regex>> = OnceLock::new();
    FILLER
        .get_or_init(|| Regex::new(r"(?i)no (new|additional|usable|relevant) evidence").ok())
        .as_ref()
}

/// Drop model filler such as "No new evidence in this batch." from analysis.
pub fn clean_analysis(analysis: &str) -> String {
    analysis
        .lines()
        .filter(|line| !filler_line().is_some_and(|re| re.is_match(line.trim())))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Render the dossier consumed by downstream document generation.
pub fn render_dossier(evidence: &CumulativeEvidence) -> String {
    let mut out: Vec<String> = Vec::new();

    for (dim, ev) in evidence.iter() {
        out.push(format!("## {}. {} — {}", dim.id, dim.key, dim.label));
        out.push(format!(
            "Investment Tier: {} | Evidence Strength: {}",
            dim.tier,
            ev.strength()
        ));
        out.push(String::new());

        if ev.quotes().is_empty() {
            out.push("No usable behavioral evidence found.".to_string());
            out.push(String::new());
            continue;
        }

        out.push("QUOTES:".to_string());
        for q in ev.quotes() {
            out.push(format!("[{} | {}]", q.depth.label(), q.source_url));
            out.push(q.text.clone());
            out.push(String::new());
        }

        let analysis = clean_analysis(ev.analysis());
        if !analysis.is_empty() {
            out.push("ANALYSIS:".to_string());
            out.push(analysis);
            out.push(String::new());
        }
        out.push(String::new());
    }

    if !evidence.cross_source_patterns().is_empty() {
        out.push("---".to_string());
        out.push("## CROSS-SOURCE PATTERNS".to_string());
        out.push(String::new());
        for p in evidence.cross_source_patterns() {
            out.push(format!("CROSS-SOURCE PATTERN: {p}"));
            out.push(String::new());
        }
    }

    if !evidence.contradictions().is_empty() {
        out.push("---".to_string());
        out.push("## CONTRADICTIONS".to_string());
        out.push(String::new());
        for c in evidence.contradictions() {
            out.push(format!("CONTRADICTION: {c}"));
            out.push(String::new());
        }
    }

    if !evidence.sources_processed().is_empty() {
        out.push("---".to_string());
        out.push(format!("Sources processed: {}", evidence.sources_processed().len()));
        for url in evidence.sources_processed() {
            out.push(format!("- {url}"));
        }
    }

    out.join("\n")
}

//! Pure merge of one batch's extraction into the accumulated evidence.

use std::collections::HashSet;

use crate::config::MergeThresholds;
use crate::dimensions::DIMENSIONS;
use crate::text::{prefix_key, word_similarity};

use super::{CumulativeEvidence, DimensionEvidence, Quote};

/// Merge `batch` into `accumulated`, returning the new accumulator.
///
/// Never removes anything already accumulated. Re-applying the same batch
/// yields an equal value.
pub fn merge_evidence(
    accumulated: &CumulativeEvidence,
    batch: &CumulativeEvidence,
    thresholds: &MergeThresholds,
) -> CumulativeEvidence {
    let dimensions = DIMENSIONS
        .iter()
        .zip(accumulated.dimensions_slice().iter().zip(batch.dimensions_slice()))
        .map(|(dim, (acc, incoming))| {
            let quotes = merge_quotes(acc.quotes(), incoming.quotes(), thresholds);
            let analysis = merge_analysis(acc.analysis(), incoming.analysis(), thresholds.analysis_similarity);
            DimensionEvidence::from_parts(quotes, analysis, dim.target())
        })
        .collect();

    CumulativeEvidence::from_parts(
        dimensions,
        merge_by_prefix(accumulated.cross_source_patterns(), batch.cross_source_patterns(), thresholds.list_prefix_chars),
        merge_by_prefix(accumulated.contradictions(), batch.contradictions(), thresholds.list_prefix_chars),
        merge_exact(accumulated.sources_processed(), batch.sources_processed()),
    )
}

fn merge_quotes(existing: &[Quote], incoming: &[Quote], thresholds: &MergeThresholds) -> Vec<Quote> {
    let mut merged = existing.to_vec();
    let mut fingerprints: HashSet<String> = existing
        .iter()
        .map(|q| q.fingerprint(thresholds.quote_fingerprint_chars))
        .collect();

    for quote in incoming {
        let fp = quote.fingerprint(thresholds.quote_fingerprint_chars);
        if fingerprints.contains(&fp) {
            continue;
        }
        // Checked against quotes added earlier in this batch too.
        let near_duplicate = merged
            .iter()
            .any(|q| word_similarity(&q.text, &quote.text) > thresholds.quote_similarity);
        if near_duplicate {
            continue;
        }
        fingerprints.insert(fp);
        merged.push(quote.clone());
    }
    merged
}

fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

fn merge_analysis(existing: &str, incoming: &str, threshold: f64) -> String {
    if incoming.trim().is_empty() {
        return existing.to_string();
    }
    if existing.trim().is_empty() {
        return incoming.trim().to_string();
    }

    let mut kept: Vec<&str> = paragraphs(existing).collect();
    let mut added = 0;
    for para in paragraphs(incoming) {
        if kept.iter().all(|p| word_similarity(p, para) < threshold) {
            kept.push(para);
            added += 1;
        }
    }

    if added == 0 {
        return existing.to_string();
    }
    let fresh = kept.split_off(kept.len() - added);
    format!("{}\n\n{}", existing, fresh.join("\n\n"))
}

fn merge_by_prefix(existing: &[String], incoming: &[String], prefix_chars: usize) -> Vec<String> {
    let mut seen: HashSet<String> = existing.iter().map(|s| prefix_key(s, prefix_chars)).collect();
    let mut merged = existing.to_vec();
    for item in incoming {
        if seen.insert(prefix_key(item, prefix_chars)) {
            merged.push(item.clone());
        }
    }
    merged
}

fn merge_exact(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let mut merged = existing.to_vec();
    for item in incoming {
        if seen.insert(item.as_str()) {
            merged.push(item.clone());
        }
    }
    merged
}

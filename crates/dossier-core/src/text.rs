//! Text similarity and excerpt helpers shared by dedup, merge and prompts.

use std::collections::HashSet;

/// Word n-gram size used for content fingerprints.
pub const SHINGLE_SIZE: usize = 5;

/// Overlapping word n-grams over normalized text.
///
/// Lowercases, deletes punctuation, and ignores words of two characters or
/// fewer so stop-word noise does not inflate overlap.
pub fn shingles(text: &str, size: usize) -> HashSet<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    let words: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .collect();

    if size == 0 || words.len() < size {
        return HashSet::new();
    }
    words.windows(size).map(|w| w.join(" ")).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Jaccard similarity over 5-word shingles. Zero when either side has none.
pub fn shingle_similarity(a: &str, b: &str) -> f64 {
    let sa = shingles(a, SHINGLE_SIZE);
    let sb = shingles(b, SHINGLE_SIZE);
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    jaccard(&sa, &sb)
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Word-level Jaccard similarity used for quote and analysis dedup.
///
/// Two empty texts are identical (1.0); one empty side gives 0.0.
pub fn word_similarity(a: &str, b: &str) -> f64 {
    let wa = word_set(a);
    let wb = word_set(b);
    match (wa.is_empty(), wb.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        _ => jaccard(&wa, &wb),
    }
}

/// First `n` characters (not bytes) of `text`.
pub fn take_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `n` characters (not bytes) of `text`.
pub fn last_chars(text: &str, n: usize) -> &str {
    let total = text.chars().count();
    if total <= n {
        return text;
    }
    match text.char_indices().nth(total - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Lowercased prefix used to dedup patterns and contradictions.
pub fn prefix_key(text: &str, n: usize) -> String {
    take_chars(text.trim(), n).to_lowercase()
}

/// Head and tail excerpt of long content with the elided middle noted.
pub fn head_tail(content: &str, head: usize, tail: usize) -> String {
    let trimmed = content.trim();
    let total = trimmed.chars().count();
    if total <= head + tail + 50 {
        return trimmed.to_string();
    }
    format!(
        "{}\n\n[... {} chars omitted ...]\n\n{}",
        take_chars(trimmed, head),
        total - head - tail,
        last_chars(trimmed, tail)
    )
}

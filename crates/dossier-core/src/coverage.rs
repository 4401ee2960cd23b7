//! Coverage status per dimension, derived on demand from quote counts.

use serde::Serialize;

use crate::dimensions::{Dimension, DIMENSIONS};
use crate::evidence::{CumulativeEvidence, Strength};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageStatus {
    // Declared worst-first so `Ord` sorts the way reports present them.
    ZeroCoverage,
    CriticalGap,
    Gap,
    Sufficient,
}

impl CoverageStatus {
    pub fn classify(count: usize, target: u32) -> Self {
        let count = count as f64;
        let target = f64::from(target);
        if count == 0.0 {
            CoverageStatus::ZeroCoverage
        } else if count < target * 0.5 {
            CoverageStatus::CriticalGap
        } else if count < target {
            CoverageStatus::Gap
        } else {
            CoverageStatus::Sufficient
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CoverageStatus::ZeroCoverage => "ZERO_COVERAGE",
            CoverageStatus::CriticalGap => "CRITICAL_GAP",
            CoverageStatus::Gap => "GAP",
            CoverageStatus::Sufficient => "SUFFICIENT",
        }
    }

    /// ZERO_COVERAGE and CRITICAL_GAP warrant a gap-fill pass.
    pub fn is_severe(self) -> bool {
        matches!(self, CoverageStatus::ZeroCoverage | CoverageStatus::CriticalGap)
    }
}

impl std::fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageEntry {
    #[serde(skip)]
    pub dimension: &'static Dimension,
    pub key: String,
    pub coverage_count: usize,
    pub target: u32,
    pub status: CoverageStatus,
    pub strength: Strength,
}

/// Entries sorted worst-first; ties keep catalog order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageMap {
    entries: Vec<CoverageEntry>,
}

impl CoverageMap {
    pub fn from_evidence(evidence: &CumulativeEvidence) -> Self {
        let counts = evidence.iter().map(|(d, ev)| (d, ev.coverage_count()));
        Self::from_counts(counts)
    }

    /// Build from arbitrary per-dimension counts (used for predicted coverage).
    pub fn from_counts(counts: impl IntoIterator<Item = (&'static Dimension, usize)>) -> Self {
        let mut entries: Vec<CoverageEntry> = counts
            .into_iter()
            .map(|(dimension, count)| {
                let target = dimension.target();
                CoverageEntry {
                    dimension,
                    key: dimension.map_key(),
                    coverage_count: count,
                    target,
                    status: CoverageStatus::classify(count, target),
                    strength: Strength::compute(count, target),
                }
            })
            .collect();
        // Stable sort keeps catalog order within a status.
        entries.sort_by_key(|e| e.status);
        CoverageMap { entries }
    }

    pub fn entries(&self) -> &[CoverageEntry] {
        &self.entries
    }

    pub fn get(&self, id: u8) -> Option<&CoverageEntry> {
        self.entries.iter().find(|e| e.dimension.id == id)
    }

    pub fn gaps(&self) -> impl Iterator<Item = &CoverageEntry> {
        self.entries.iter().filter(|e| e.status != CoverageStatus::Sufficient)
    }

    pub fn severe_gaps(&self) -> impl Iterator<Item = &CoverageEntry> {
        self.entries.iter().filter(|e| e.status.is_severe())
    }

    pub fn has_severe_gaps(&self) -> bool {
        self.severe_gaps().next().is_some()
    }

    /// Text block handed to extraction batches after the first.
    pub fn format_for_batch(&self) -> String {
        let mut lines = vec!["CURRENT COVERAGE STATUS:".to_string(), String::new()];
        for e in &self.entries {
            let marker = if e.status == CoverageStatus::Sufficient {
                String::new()
            } else {
                format!(" *** {} ***", e.status)
            };
            lines.push(format!(
                "{}: {} quotes (target: {}, strength: {}){}",
                e.key, e.coverage_count, e.target, e.strength, marker
            ));
        }
        lines.join("\n")
    }
}

/// Predicted coverage with every dimension at zero.
pub fn empty_counts() -> impl Iterator<Item = (&'static Dimension, usize)> {
    DIMENSIONS.iter().map(|d| (d, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{Quote, QuoteDepth};

    fn quotes(n: usize) -> Vec<Quote> {
        (0..n)
            .map(|i| Quote::new(format!("quote {i}"), format!("https://s{i}.org"), QuoteDepth::Mention))
            .collect()
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(CoverageStatus::classify(0, 7), CoverageStatus::ZeroCoverage);
        assert_eq!(CoverageStatus::classify(3, 7), CoverageStatus::CriticalGap);
        assert_eq!(CoverageStatus::classify(4, 7), CoverageStatus::Gap);
        assert_eq!(CoverageStatus::classify(7, 7), CoverageStatus::Sufficient);
        assert_eq!(CoverageStatus::classify(1, 2), CoverageStatus::Gap);
    }

    #[test]
    fn test_map_sorted_worst_first_with_catalog_ties() {
        let ev = CumulativeEvidence::empty()
            .with_dimension(1, quotes(7), "")
            .with_dimension(2, quotes(4), "")
            .with_dimension(5, quotes(1), "");
        let map = CoverageMap::from_evidence(&ev);
        let entries = map.entries();
        assert_eq!(entries.len(), 25);
        assert_eq!(entries[0].key, "3_INFLUENCE_SUSCEPTIBILITY");
        assert_eq!(entries.last().unwrap().key, "1_DECISION_MAKING");
        let gap_keys: Vec<_> = map
            .entries()
            .iter()
            .filter(|e| e.status == CoverageStatus::Gap)
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(gap_keys, vec!["2_TRUST_CALIBRATION", "5_LEARNING_STYLE"]);
    }

    #[test]
    fn test_format_for_batch_marks_gaps() {
        let ev = CumulativeEvidence::empty().with_dimension(1, quotes(7), "");
        let text = CoverageMap::from_evidence(&ev).format_for_batch();
        assert!(text.starts_with("CURRENT COVERAGE STATUS:\n\n"));
        assert!(text.contains("1_DECISION_MAKING: 7 quotes (target: 7, strength: STRONG)\n")
            || text.ends_with("1_DECISION_MAKING: 7 quotes (target: 7, strength: STRONG)"));
        assert!(text.contains("2_TRUST_CALIBRATION: 0 quotes (target: 7, strength: ZERO) *** ZERO_COVERAGE ***"));
    }
}

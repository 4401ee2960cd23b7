//! Source records as they move through the pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a source's content relates to the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    TargetAuthored,
    TargetCoverage,
    InstitutionalInference,
    TargetReshare,
}

impl Attribution {
    /// Attribution assigned when a classifier gives no usable answer.
    pub const FAIL_OPEN_DEFAULT: Attribution = Attribution::TargetCoverage;

    pub fn as_str(self) -> &'static str {
        match self {
            Attribution::TargetAuthored => "target_authored",
            Attribution::TargetCoverage => "target_coverage",
            Attribution::InstitutionalInference => "institutional_inference",
            Attribution::TargetReshare => "target_reshare",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "target_authored" => Some(Attribution::TargetAuthored),
            "target_coverage" => Some(Attribution::TargetCoverage),
            "institutional_inference" => Some(Attribution::InstitutionalInference),
            "target_reshare" => Some(Attribution::TargetReshare),
            _ => None,
        }
    }
}

/// Rank used when two duplicates compete: lower wins.
///
/// authored > coverage > reshare > institutional > unknown.
pub fn attribution_rank(attribution: Option<Attribution>) -> u8 {
    match attribution {
        Some(Attribution::TargetAuthored) => 1,
        Some(Attribution::TargetCoverage) => 2,
        Some(Attribution::TargetReshare) => 3,
        Some(Attribution::InstitutionalInference) => 4,
        None => 5,
    }
}

impl std::fmt::Display for Attribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a source was killed during screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    PassiveInteraction,
    DirectoryListing,
    WrongAttribution,
    WrongPerson,
}

impl KillReason {
    pub fn as_str(self) -> &'static str {
        match self {
            KillReason::PassiveInteraction => "passive_interaction",
            KillReason::DirectoryListing => "directory_listing",
            KillReason::WrongAttribution => "wrong_attribution",
            KillReason::WrongPerson => "wrong_person",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "passive_interaction" => Some(KillReason::PassiveInteraction),
            "directory_listing" => Some(KillReason::DirectoryListing),
            "wrong_attribution" => Some(KillReason::WrongAttribution),
            "wrong_person" => Some(KillReason::WrongPerson),
            _ => None,
        }
    }
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse reliability / voice ranking, 1 (unscripted voice) to 5 (structural records).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SourceTier(u8);

impl SourceTier {
    pub const DEFAULT: SourceTier = SourceTier(3);

    pub fn new(tier: u8) -> Option<Self> {
        (1..=5).contains(&tier).then_some(SourceTier(tier))
    }

    /// Clamp arbitrary model output into a valid tier, defaulting to 3.
    pub fn from_model(raw: Option<i64>) -> Self {
        raw.and_then(|t| u8::try_from(t).ok())
            .and_then(SourceTier::new)
            .unwrap_or(SourceTier::DEFAULT)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "Podcast/interview/video",
            2 => "Press profile",
            3 => "Self-authored",
            4 => "Institutional during tenure",
            _ => "Structural records",
        }
    }
}

impl Default for SourceTier {
    fn default() -> Self {
        SourceTier::DEFAULT
    }
}

impl TryFrom<u8> for SourceTier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SourceTier::new(value).ok_or_else(|| format!("source tier out of range: {value}"))
    }
}

impl From<SourceTier> for u8 {
    fn from(tier: SourceTier) -> u8 {
        tier.0
    }
}

/// Where a source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Search,
    BlogCrawl,
    LinkedinPost,
    UserSupplied,
    GapFill,
}

/// Search query category; `D` marks institutional/org-context queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryCategory {
    A,
    B,
    C,
    D,
    E,
}

impl QueryCategory {
    pub fn is_institutional(self) -> bool {
        self == QueryCategory::D
    }
}

/// A web source about the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attribution: Option<Attribution>,
    #[serde(default)]
    pub institutional_context: Option<String>,
    #[serde(default)]
    pub source_tier: SourceTier,
    /// Dimension id to predicted depth (0..=3); only non-zero entries kept.
    #[serde(default)]
    pub depth_scores: BTreeMap<u8, u8>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_category: Option<QueryCategory>,
    #[serde(default)]
    pub provenance: Provenance,
    /// Pre-verified provenance: skips screening and relevance filtering.
    #[serde(default)]
    pub bypass_screening: bool,
    /// Scoring failed for this source; selection still considers it, after scored ones.
    #[serde(default)]
    pub unscored: bool,
}

impl Source {
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Source {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            content: None,
            attribution: None,
            institutional_context: None,
            source_tier: SourceTier::DEFAULT,
            depth_scores: BTreeMap::new(),
            query: None,
            query_category: None,
            provenance: Provenance::Search,
            bypass_screening: false,
            unscored: false,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = Some(attribution);
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>, category: Option<QueryCategory>) -> Self {
        self.query = Some(query.into());
        self.query_category = category;
        self
    }

    /// Mark as pre-verified so screening and relevance filtering pass it through.
    pub fn bypassing_screening(mut self) -> Self {
        self.bypass_screening = true;
        self
    }

    /// Fetched content, falling back to the search snippet.
    pub fn text(&self) -> &str {
        match self.content.as_deref() {
            Some(c) if !c.is_empty() => c,
            _ => &self.snippet,
        }
    }

    /// Character count the packer and selector budget against.
    pub fn char_count(&self) -> usize {
        self.text().chars().count()
    }

    pub fn content_len(&self) -> usize {
        self.content.as_deref().map(|c| c.chars().count()).unwrap_or(0)
    }

    pub fn from_institutional_query(&self) -> bool {
        self.query_category.is_some_and(QueryCategory::is_institutional)
    }

    /// Number of dimensions with a non-zero predicted depth.
    pub fn signal_dimensions(&self) -> usize {
        self.depth_scores.values().filter(|d| **d > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribution_round_trip_strings() {
        for a in [
            Attribution::TargetAuthored,
            Attribution::TargetCoverage,
            Attribution::InstitutionalInference,
            Attribution::TargetReshare,
        ] {
            assert_eq!(Attribution::parse(a.as_str()), Some(a));
        }
        assert_eq!(Attribution::parse("nonsense"), None);
    }

    #[test]
    fn test_attribution_rank_order() {
        assert!(attribution_rank(Some(Attribution::TargetAuthored)) < attribution_rank(Some(Attribution::TargetCoverage)));
        assert!(attribution_rank(Some(Attribution::TargetCoverage)) < attribution_rank(Some(Attribution::TargetReshare)));
        assert!(attribution_rank(Some(Attribution::TargetReshare)) < attribution_rank(Some(Attribution::InstitutionalInference)));
        assert!(attribution_rank(Some(Attribution::InstitutionalInference)) < attribution_rank(None));
    }

    #[test]
    fn test_source_tier_defaults_and_clamps() {
        assert_eq!(SourceTier::from_model(None).get(), 3);
        assert_eq!(SourceTier::from_model(Some(9)).get(), 3);
        assert_eq!(SourceTier::from_model(Some(1)).get(), 1);
        assert_eq!(SourceTier::new(5).map(SourceTier::label), Some("Structural records"));
    }

    #[test]
    fn test_source_tier_serde_rejects_out_of_range() {
        let ok: SourceTier = serde_json::from_str("2").unwrap();
        assert_eq!(ok.get(), 2);
        assert!(serde_json::from_str::<SourceTier>("7").is_err());
    }

    #[test]
    fn test_text_falls_back_to_snippet() {
        let s = Source::new("https://a.org", "t", "snippet");
        assert_eq!(s.text(), "snippet");
        let s = s.with_content("full body");
        assert_eq!(s.text(), "full body");
        assert_eq!(s.char_count(), 9);
    }

    #[test]
    fn test_source_deserializes_with_defaults() {
        let s: Source = serde_json::from_str(r#"{"url":"https://x.org/a"}"#).unwrap();
        assert_eq!(s.source_tier, SourceTier::DEFAULT);
        assert!(!s.bypass_screening);
        assert_eq!(s.provenance, Provenance::Search);
    }
}

//! Cumulative evidence: the accumulator threaded through every extraction batch.
//!
//! `CumulativeEvidence` always holds exactly one [`DimensionEvidence`] per
//! catalog entry, in catalog order. Coverage counts and strengths are derived
//! from the quote lists and cannot be set directly, so the invariant
//! `coverage_count == quotes.len()` holds for every value of these types,
//! including values loaded from JSON.

pub mod merge;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::dimensions::{self, Dimension, DIMENSIONS, DIMENSION_COUNT};
use crate::text::take_chars;

pub use merge::merge_evidence;

/// Evidence strength relative to a dimension's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strength {
    Zero,
    Thin,
    Moderate,
    Strong,
}

impl Strength {
    /// 0 → ZERO, below half the target → THIN, below target → MODERATE, else STRONG.
    pub fn compute(count: usize, target: u32) -> Strength {
        let count = count as f64;
        let target = f64::from(target);
        if count == 0.0 {
            Strength::Zero
        } else if count < target * 0.5 {
            Strength::Thin
        } else if count < target {
            Strength::Moderate
        } else {
            Strength::Strong
        }
    }
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strength::Zero => "ZERO",
            Strength::Thin => "THIN",
            Strength::Moderate => "MODERATE",
            Strength::Strong => "STRONG",
        };
        f.write_str(s)
    }
}

/// Mention / passage / rich-evidence scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QuoteDepth {
    Mention = 1,
    Passage = 2,
    Rich = 3,
}

impl QuoteDepth {
    /// Lenient conversion from model output; anything outside 1..=3 is a mention.
    pub fn from_value(value: &Value) -> QuoteDepth {
        match value.as_f64() {
            Some(d) if d == 3.0 => QuoteDepth::Rich,
            Some(d) if d == 2.0 => QuoteDepth::Passage,
            _ => QuoteDepth::Mention,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QuoteDepth::Mention => "Mention",
            QuoteDepth::Passage => "Passage",
            QuoteDepth::Rich => "Rich",
        }
    }
}

impl TryFrom<u8> for QuoteDepth {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(QuoteDepth::Mention),
            2 => Ok(QuoteDepth::Passage),
            3 => Ok(QuoteDepth::Rich),
            other => Err(format!("quote depth out of range: {other}")),
        }
    }
}

impl From<QuoteDepth> for u8 {
    fn from(depth: QuoteDepth) -> u8 {
        depth as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    pub source_url: String,
    pub depth: QuoteDepth,
}

impl Quote {
    pub fn new(text: impl Into<String>, source_url: impl Into<String>, depth: QuoteDepth) -> Self {
        Quote {
            text: text.into(),
            source_url: source_url.into(),
            depth,
        }
    }

    /// `source_url|||first N chars of text`.
    pub fn fingerprint(&self, prefix_chars: usize) -> String {
        format!("{}|||{}", self.source_url, take_chars(&self.text, prefix_chars))
    }
}

/// Evidence filed under one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionEvidence {
    quotes: Vec<Quote>,
    analysis: String,
    strength: Strength,
}

impl DimensionEvidence {
    fn empty() -> Self {
        DimensionEvidence {
            quotes: Vec::new(),
            analysis: String::new(),
            strength: Strength::Zero,
        }
    }

    pub(crate) fn from_parts(quotes: Vec<Quote>, analysis: String, target: u32) -> Self {
        let strength = Strength::compute(quotes.len(), target);
        DimensionEvidence {
            quotes,
            analysis,
            strength,
        }
    }

    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    pub fn analysis(&self) -> &str {
        &self.analysis
    }

    pub fn coverage_count(&self) -> usize {
        self.quotes.len()
    }

    pub fn strength(&self) -> Strength {
        self.strength
    }
}

impl Serialize for DimensionEvidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DimensionEvidence", 4)?;
        s.serialize_field("quotes", &self.quotes)?;
        s.serialize_field("analysis", &self.analysis)?;
        s.serialize_field("coverage_count", &self.coverage_count())?;
        s.serialize_field("strength", &self.strength)?;
        s.end()
    }
}

/// Corpus-level evidence density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceDensity {
    High,
    Medium,
    Low,
}

impl EvidenceDensity {
    /// HIGH at 80+ quotes, LOW under 30.
    pub fn from_quote_count(total: usize) -> Self {
        if total >= 80 {
            EvidenceDensity::High
        } else if total < 30 {
            EvidenceDensity::Low
        } else {
            EvidenceDensity::Medium
        }
    }
}

/// The accumulator. Replaced, never mutated, by [`merge_evidence`].
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeEvidence {
    dimensions: Vec<DimensionEvidence>,
    cross_source_patterns: Vec<String>,
    contradictions: Vec<String>,
    sources_processed: Vec<String>,
}

impl Default for CumulativeEvidence {
    fn default() -> Self {
        CumulativeEvidence::empty()
    }
}

impl CumulativeEvidence {
    /// Scaffold with all 25 dimensions present and empty.
    pub fn empty() -> Self {
        CumulativeEvidence {
            dimensions: vec![DimensionEvidence::empty(); DIMENSION_COUNT],
            cross_source_patterns: Vec::new(),
            contradictions: Vec::new(),
            sources_processed: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        dimensions: Vec<DimensionEvidence>,
        cross_source_patterns: Vec<String>,
        contradictions: Vec<String>,
        sources_processed: Vec<String>,
    ) -> Self {
        debug_assert_eq!(dimensions.len(), DIMENSION_COUNT);
        CumulativeEvidence {
            dimensions,
            cross_source_patterns,
            contradictions,
            sources_processed,
        }
    }

    /// Copy of `self` with one dimension's quotes and analysis replaced.
    pub fn with_dimension(mut self, id: u8, quotes: Vec<Quote>, analysis: impl Into<String>) -> Self {
        if let Some(pos) = DIMENSIONS.iter().position(|d| d.id == id) {
            self.dimensions[pos] = DimensionEvidence::from_parts(quotes, analysis.into(), DIMENSIONS[pos].target());
        }
        self
    }

    pub fn with_patterns(mut self, patterns: Vec<String>) -> Self {
        self.cross_source_patterns = patterns;
        self
    }

    pub fn with_contradictions(mut self, contradictions: Vec<String>) -> Self {
        self.contradictions = contradictions;
        self
    }

    pub fn with_sources_processed(mut self, sources: Vec<String>) -> Self {
        self.sources_processed = sources;
        self
    }

    pub fn dimension(&self, id: u8) -> Option<&DimensionEvidence> {
        DIMENSIONS
            .iter()
            .position(|d| d.id == id)
            .map(|pos| &self.dimensions[pos])
    }

    /// Catalog entries paired with their evidence, in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static Dimension, &DimensionEvidence)> {
        DIMENSIONS.iter().zip(self.dimensions.iter())
    }

    pub(crate) fn dimensions_slice(&self) -> &[DimensionEvidence] {
        &self.dimensions
    }

    pub fn cross_source_patterns(&self) -> &[String] {
        &self.cross_source_patterns
    }

    pub fn contradictions(&self) -> &[String] {
        &self.contradictions
    }

    pub fn sources_processed(&self) -> &[String] {
        &self.sources_processed
    }

    pub fn total_quotes(&self) -> usize {
        self.dimensions.iter().map(DimensionEvidence::coverage_count).sum()
    }

    /// Dimensions with at least one quote.
    pub fn covered_dimensions(&self) -> usize {
        self.dimensions.iter().filter(|d| d.coverage_count() > 0).count()
    }

    pub fn density(&self) -> EvidenceDensity {
        EvidenceDensity::from_quote_count(self.total_quotes())
    }

    /// Pretty JSON handed to the next batch as prior context.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Content digest (SHA-256 hex over compact JSON), stable across runs.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Lenient normalization of loosely-structured JSON onto the scaffold.
    ///
    /// Unknown dimension keys are dropped (retired aliases are folded into
    /// their current dimension), quote depths outside 1..=3 become mentions,
    /// quotes without text are discarded, and coverage/strength are always
    /// recomputed from the quotes actually present.
    pub fn from_value(raw: &Value) -> Self {
        let mut quotes: Vec<Vec<Quote>> = vec![Vec::new(); DIMENSION_COUNT];
        let mut analysis: Vec<Vec<String>> = vec![Vec::new(); DIMENSION_COUNT];

        if let Some(map) = raw.get("dimensions").and_then(Value::as_object) {
            for (key, dim_value) in map {
                let Some(dim) = dimensions::resolve(key) else {
                    continue;
                };
                let pos = usize::from(dim.id) - 1;

                if let Some(raw_quotes) = dim_value.get("quotes").and_then(Value::as_array) {
                    for q in raw_quotes {
                        let text = value_to_string(q.get("text")).trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        let source_url = value_to_string(q.get("source_url")).trim().to_string();
                        let depth = q
                            .get("depth")
                            .map(QuoteDepth::from_value)
                            .unwrap_or(QuoteDepth::Mention);
                        quotes[pos].push(Quote::new(text, source_url, depth));
                    }
                }

                let text = value_to_string(dim_value.get("analysis"));
                if !text.trim().is_empty() {
                    analysis[pos].push(text.trim().to_string());
                }
            }
        }

        let dimensions = DIMENSIONS
            .iter()
            .zip(quotes.into_iter().zip(analysis))
            .map(|(d, (q, a))| DimensionEvidence::from_parts(q, a.join("\n\n"), d.target()))
            .collect();

        CumulativeEvidence::from_parts(
            dimensions,
            string_list(raw.get("cross_source_patterns")),
            string_list(raw.get("contradictions")),
            string_list(raw.get("sources_processed")),
        )
    }
}

fn value_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| value_to_string(Some(v)))
                .filter(|s| !s.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

struct DimensionMap<'a>(&'a [DimensionEvidence]);

impl Serialize for DimensionMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (d, ev) in DIMENSIONS.iter().zip(self.0) {
            map.serialize_entry(&d.map_key(), ev)?;
        }
        map.end()
    }
}

impl Serialize for CumulativeEvidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("CumulativeEvidence", 4)?;
        s.serialize_field("dimensions", &DimensionMap(&self.dimensions))?;
        s.serialize_field("cross_source_patterns", &self.cross_source_patterns)?;
        s.serialize_field("contradictions", &self.contradictions)?;
        s.serialize_field("sources_processed", &self.sources_processed)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for CumulativeEvidence {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(CumulativeEvidence::from_value(&raw))
    }
}

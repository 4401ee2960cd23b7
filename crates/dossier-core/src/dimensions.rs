//! The fixed catalog of 25 behavioral dimensions.
//!
//! Every other component refers to dimensions through this table, by id or by
//! the `"{id}_{KEY}"` string used as the evidence map key.

use serde::{Deserialize, Serialize};

/// Per-dimension evidence investment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvestmentTier {
    High,
    Medium,
    Low,
}

impl InvestmentTier {
    /// Quote count considered sufficient for a dimension of this tier.
    pub fn target(self) -> u32 {
        match self {
            InvestmentTier::High => 7,
            InvestmentTier::Medium => 5,
            InvestmentTier::Low => 2,
        }
    }

    /// Weight applied by the source selector.
    pub fn weight(self) -> f64 {
        match self {
            InvestmentTier::High => 3.0,
            InvestmentTier::Medium => 2.0,
            InvestmentTier::Low => 1.0,
        }
    }

    fn prompt_heading(self) -> &'static str {
        match self {
            InvestmentTier::High => "HIGH INVESTMENT (6-8 evidence entries required):",
            InvestmentTier::Medium => "MEDIUM INVESTMENT (4-6 evidence entries required):",
            InvestmentTier::Low => "LOW INVESTMENT (1-3 evidence entries required):",
        }
    }
}

impl std::fmt::Display for InvestmentTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvestmentTier::High => "HIGH",
            InvestmentTier::Medium => "MEDIUM",
            InvestmentTier::Low => "LOW",
        };
        f.write_str(s)
    }
}

/// One entry of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    pub id: u8,
    pub key: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub tier: InvestmentTier,
}

impl Dimension {
    pub fn target(&self) -> u32 {
        self.tier.target()
    }

    /// Evidence map key, e.g. `"2_TRUST_CALIBRATION"`.
    pub fn map_key(&self) -> String {
        format!("{}_{}", self.id, self.key)
    }
}

use InvestmentTier::{High, Low, Medium};

const fn dim(
    id: u8,
    key: &'static str,
    label: &'static str,
    description: &'static str,
    tier: InvestmentTier,
) -> Dimension {
    Dimension {
        id,
        key,
        label,
        description,
        tier,
    }
}

pub const DIMENSION_COUNT: usize = 25;

pub static DIMENSIONS: [Dimension; DIMENSION_COUNT] = [
    dim(1, "DECISION_MAKING", "Decision Making", "How they evaluate proposals and opportunities. Speed of decisions, gut vs analysis, what triggers yes/no.", High),
    dim(2, "TRUST_CALIBRATION", "Trust Calibration", "What builds or breaks credibility. Verification behavior, skepticism triggers.", High),
    dim(3, "INFLUENCE_SUSCEPTIBILITY", "Influence Susceptibility", "What persuades them, who they defer to, resistance patterns.", Medium),
    dim(4, "COMMUNICATION_STYLE", "Communication Style", "Language patterns, directness, framing, how they explain.", High),
    dim(5, "LEARNING_STYLE", "Learning Style", "How they take in new information. Reading vs conversation, deep dive vs summary.", Low),
    dim(6, "TIME_ORIENTATION", "Time Orientation", "Past/present/future emphasis, patience level, urgency triggers.", Medium),
    dim(7, "IDENTITY_SELF_CONCEPT", "Identity & Self-Concept", "How they see and present themselves. Origin story, identity markers.", High),
    dim(8, "VALUES_HIERARCHY", "Values Hierarchy", "What they prioritize when values conflict. Trade-off decisions.", High),
    dim(9, "STATUS_RECOGNITION", "Status & Recognition", "How they relate to prestige and credit. Recognition needs.", Low),
    dim(10, "BOUNDARY_CONDITIONS", "Boundary Conditions", "Hard limits and non-negotiables. Explicit red lines.", Medium),
    dim(11, "EMOTIONAL_TRIGGERS", "Emotional Triggers", "What excites or irritates them. Energy shifts, enthusiasm spikes.", Medium),
    dim(12, "RELATIONSHIP_PATTERNS", "Relationship Patterns", "How they engage with people. Loyalty, collaboration style.", Medium),
    dim(13, "RISK_TOLERANCE", "Risk Tolerance", "Attitude toward uncertainty and failure. Bet-sizing, hedging.", Medium),
    dim(14, "RESOURCE_PHILOSOPHY", "Resource Philosophy", "How they think about money, time, leverage.", Medium),
    dim(15, "COMMITMENT_PATTERNS", "Commitment Patterns", "How they make and keep commitments. Escalation, exit patterns.", Medium),
    dim(16, "KNOWLEDGE_AREAS", "Knowledge Areas", "Domains of expertise and intellectual passion.", Low),
    dim(17, "CONTRADICTION_PATTERNS", "Contradiction Patterns", "Inconsistencies between stated and revealed preferences. Say/do gaps.", High),
    dim(18, "RETREAT_PATTERNS", "Retreat Patterns", "How they disengage, recover, reset. Procedural delays, topic shifts.", Low),
    dim(19, "SHAME_DEFENSE_TRIGGERS", "Shame & Defense Triggers", "What they protect, what feels threatening. Ego-defense behavior when triggered.", Low),
    dim(20, "REAL_TIME_INTERPERSONAL_TELLS", "Real-Time Interpersonal Tells", "Observable behavior in interaction. How they signal evaluation vs collaboration.", Low),
    dim(21, "TEMPO_MANAGEMENT", "Tempo Management", "Pacing of decisions, conversations, projects. What each direction signals.", Low),
    dim(22, "HIDDEN_FRAGILITIES", "Hidden Fragilities", "Vulnerabilities they manage or compensate for. What they're afraid is true about themselves or their work.", Low),
    dim(23, "RECOVERY_PATHS", "Recovery Paths", "How they bounce back from setbacks. Reset mechanisms.", Low),
    dim(24, "CONDITIONAL_BEHAVIORAL_FORKS", "Conditional Behavioral Forks", "When X happens, they do Y. When not-X, they do Z. Both branches for every pattern.", Low),
    dim(25, "POWER_ANALYSIS", "Power Analysis", "How they read, navigate, and deploy power: structural position, coalition dynamics, information asymmetry, who they think the real decision-makers are.", High),
];

/// Retired dimension keys and the current key their evidence folds into.
const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("SELF_CONCEPT", "IDENTITY_SELF_CONCEPT"),
    ("VALUE_HIERARCHY", "VALUES_HIERARCHY"),
    ("RISK_ARCHITECTURE", "RISK_TOLERANCE"),
    ("CONTRADICTION_ARCHITECTURE", "CONTRADICTION_PATTERNS"),
    ("STATUS_DYNAMICS", "STATUS_RECOGNITION"),
    ("INSTITUTIONAL_POSTURE", "RESOURCE_PHILOSOPHY"),
    ("NETWORK_MAP", "RELATIONSHIP_PATTERNS"),
    ("CONTROVERSY_AND_PRESSURE", "CONTRADICTION_PATTERNS"),
];

pub fn all() -> &'static [Dimension] {
    &DIMENSIONS
}

pub fn by_id(id: u8) -> Option<&'static Dimension> {
    DIMENSIONS.iter().find(|d| d.id == id)
}

pub fn by_key(key: &str) -> Option<&'static Dimension> {
    DIMENSIONS.iter().find(|d| d.key == key)
}

pub fn by_tier(tier: InvestmentTier) -> impl Iterator<Item = &'static Dimension> {
    DIMENSIONS.iter().filter(move |d| d.tier == tier)
}

/// All evidence map keys in catalog order.
pub fn all_map_keys() -> Vec<String> {
    DIMENSIONS.iter().map(Dimension::map_key).collect()
}

/// Resolve a key as it may appear in model output.
///
/// Accepts `"7_IDENTITY_SELF_CONCEPT"`, a bare `"IDENTITY_SELF_CONCEPT"`, a
/// retired alias such as `"SELF_CONCEPT"` (with or without a numeric prefix),
/// and is case-insensitive.
pub fn resolve(raw: &str) -> Option<&'static Dimension> {
    let upper = raw.trim().to_ascii_uppercase();
    let bare = match upper.split_once('_') {
        Some((prefix, rest)) if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) => {
            rest
        }
        _ => upper.as_str(),
    };

    if let Some(d) = by_key(bare) {
        return Some(d);
    }
    LEGACY_ALIASES
        .iter()
        .find(|(old, _)| *old == bare)
        .and_then(|(_, current)| by_key(current))
}

/// Dimension list grouped by tier, as embedded in extraction prompts.
pub fn format_for_prompt() -> String {
    let mut lines = Vec::new();
    for tier in [High, Medium, Low] {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(tier.prompt_heading().to_string());
        for d in by_tier(tier) {
            lines.push(format!("{:>2}. {} — {}", d.id, d.key, d.description));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_25_unique_ids_in_order() {
        for (i, d) in DIMENSIONS.iter().enumerate() {
            assert_eq!(d.id as usize, i + 1);
        }
        let mut keys: Vec<_> = DIMENSIONS.iter().map(|d| d.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), DIMENSION_COUNT);
    }

    #[test]
    fn test_tier_counts_and_targets() {
        assert_eq!(by_tier(High).count(), 7);
        assert_eq!(by_tier(Medium).count(), 8);
        assert_eq!(by_tier(Low).count(), 10);
        assert_eq!(by_id(1).map(|d| d.target()), Some(7));
        assert_eq!(by_id(3).map(|d| d.target()), Some(5));
        assert_eq!(by_id(5).map(|d| d.target()), Some(2));
        assert_eq!(by_id(25).map(|d| d.tier), Some(High));
    }

    #[test]
    fn test_map_key_format() {
        let d = by_key("TRUST_CALIBRATION").unwrap();
        assert_eq!(d.map_key(), "2_TRUST_CALIBRATION");
        assert_eq!(all_map_keys().len(), 25);
    }

    #[test]
    fn test_resolve_accepts_prefixed_bare_and_legacy_keys() {
        assert_eq!(resolve("7_IDENTITY_SELF_CONCEPT").map(|d| d.id), Some(7));
        assert_eq!(resolve("identity_self_concept").map(|d| d.id), Some(7));
        assert_eq!(resolve("SELF_CONCEPT").map(|d| d.id), Some(7));
        assert_eq!(resolve("4_SELF_CONCEPT").map(|d| d.id), Some(7));
        assert_eq!(resolve("NETWORK_MAP").map(|d| d.id), Some(12));
        assert!(resolve("99_NOT_A_DIMENSION").is_none());
    }

    #[test]
    fn test_prompt_format_lists_every_dimension() {
        let text = format_for_prompt();
        assert!(text.starts_with("HIGH INVESTMENT"));
        for d in all() {
            assert!(text.contains(d.key), "missing {}", d.key);
        }
    }
}

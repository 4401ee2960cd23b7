//! JSON recovery from loosely-structured model output.
//!
//! Extraction output is tried against an ordered chain of strategies; the
//! first strategy yielding an object with a `dimensions` field wins. The
//! result is a tagged [`ParseOutcome`], never an error used for control flow.

use serde::Serialize;
use serde_json::Value;

use crate::evidence::CumulativeEvidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    Direct,
    Fenced,
    OutermostBraces,
}

impl ParseStrategy {
    pub const CHAIN: [ParseStrategy; 3] = [ParseStrategy::Direct, ParseStrategy::Fenced, ParseStrategy::OutermostBraces];

    pub fn as_str(self) -> &'static str {
        match self {
            ParseStrategy::Direct => "direct",
            ParseStrategy::Fenced => "fenced",
            ParseStrategy::OutermostBraces => "outermost_braces",
        }
    }

    /// Candidate JSON text this strategy would hand to the parser.
    fn candidate(self, raw: &str) -> Option<&str> {
        match self {
            ParseStrategy::Direct => Some(raw.trim()),
            ParseStrategy::Fenced => fenced_block(raw),
            ParseStrategy::OutermostBraces => delimited(raw, '{', '}'),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed { value: T, strategy: ParseStrategy },
    Failed { attempts: Vec<(ParseStrategy, String)> },
}

impl<T> ParseOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed { value, .. } => Some(value),
            ParseOutcome::Failed { .. } => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseOutcome::Parsed { .. })
    }

    /// One-line summary of why every strategy failed.
    pub fn failure_summary(&self) -> Option<String> {
        match self {
            ParseOutcome::Parsed { .. } => None,
            ParseOutcome::Failed { attempts } => Some(
                attempts
                    .iter()
                    .map(|(s, reason)| format!("{}: {}", s.as_str(), reason))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        }
    }
}

/// Contents of the first markdown code fence, with an optional `json` tag.
fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// Slice from the first `open` to the last `close`, inclusive.
fn delimited(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

/// Run the strategy chain looking for an object with a `dimensions` field.
pub fn parse_evidence_value(raw: &str) -> ParseOutcome<Value> {
    let mut attempts = Vec::new();
    for strategy in ParseStrategy::CHAIN {
        let Some(candidate) = strategy.candidate(raw) else {
            attempts.push((strategy, "no candidate".to_string()));
            continue;
        };
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) if value.get("dimensions").is_some() => {
                return ParseOutcome::Parsed { value, strategy };
            }
            Ok(_) => attempts.push((strategy, "missing `dimensions` field".to_string())),
            Err(e) => attempts.push((strategy, e.to_string())),
        }
    }
    ParseOutcome::Failed { attempts }
}

/// Parse and normalize extraction output onto the evidence scaffold.
pub fn parse_evidence(raw: &str) -> ParseOutcome<CumulativeEvidence> {
    match parse_evidence_value(raw) {
        ParseOutcome::Parsed { value, strategy } => ParseOutcome::Parsed {
            value: CumulativeEvidence::from_value(&value),
            strategy,
        },
        ParseOutcome::Failed { attempts } => ParseOutcome::Failed { attempts },
    }
}

/// Outermost JSON array in classifier output, if it parses.
pub fn json_array(raw: &str) -> Option<Vec<Value>> {
    let candidate = delimited(raw, '[', ']')?;
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

/// Outermost JSON object in classifier output, if it parses.
pub fn json_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    let candidate = delimited(raw, '{', '}')?;
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// `index` field of a classifier result, when it is a valid position in a batch.
pub fn result_index(item: &Value, len: usize) -> Option<usize> {
    let idx = item.get("index")?.as_u64()?;
    usize::try_from(idx).ok().filter(|i| *i < len)
}

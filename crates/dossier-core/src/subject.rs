//! Canonical biographical data about the research subject.
//!
//! Authoritative for person disambiguation (name variants) and for the
//! tenure-window checks in relevance filtering.

use serde::{Deserialize, Serialize};

use crate::error::{DossierError, DossierResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareerEntry {
    pub title: String,
    pub employer: String,
    #[serde(default)]
    pub start_date: Option<String>,
    /// `None` means the role is current.
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EducationEntry {
    pub institution: String,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub years: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProfile {
    pub name: String,
    #[serde(default)]
    pub current_title: Option<String>,
    #[serde(default)]
    pub current_employer: Option<String>,
    #[serde(default)]
    pub career_history: Vec<CareerEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub boards: Vec<String>,
    #[serde(default)]
    pub websites: Vec<String>,
    #[serde(default)]
    pub affiliations: Vec<String>,
}

impl SubjectProfile {
    pub fn new(name: impl Into<String>) -> Self {
        SubjectProfile {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_json(raw: &str) -> DossierResult<Self> {
        let profile: SubjectProfile = serde_json::from_str(raw)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> DossierResult<()> {
        if self.name.trim().is_empty() {
            return Err(DossierError::InvalidSubject("name is empty".to_string()));
        }
        Ok(())
    }

    pub fn with_role(mut self, title: &str, employer: &str) -> Self {
        self.current_title = Some(title.to_string());
        self.current_employer = Some(employer.to_string());
        self
    }

    pub fn with_career(mut self, entry: CareerEntry) -> Self {
        self.career_history.push(entry);
        self
    }

    /// Spellings under which the subject may appear in a source.
    ///
    /// "John Michael Smith" yields the full name, "J. Smith", "Smith, John",
    /// "John Smith" and "J.M. Smith".
    pub fn name_variants(&self) -> Vec<String> {
        let full = self.name.trim().to_string();
        let parts: Vec<&str> = full.split_whitespace().collect();
        let mut variants = vec![full.clone()];

        if parts.len() >= 2 {
            let first = parts[0];
            let last = parts[parts.len() - 1];
            let initial = |p: &str| p.chars().next().map(String::from).unwrap_or_default();

            variants.push(format!("{}. {}", initial(first), last));
            variants.push(format!("{last}, {first}"));

            if parts.len() >= 3 {
                variants.push(format!("{first} {last}"));
                let middles: String = parts[1..parts.len() - 1]
                    .iter()
                    .map(|p| format!("{}.", initial(p)))
                    .collect();
                variants.push(format!("{}.{} {}", initial(first), middles, last));
            }
        }
        variants
    }

    /// True when any name variant occurs in `haystack` (case-insensitive).
    pub fn is_named_in(&self, haystack: &str) -> bool {
        let lower = haystack.to_lowercase();
        self.name_variants()
            .iter()
            .any(|v| !v.is_empty() && lower.contains(&v.to_lowercase()))
    }

    /// Career timeline block embedded in screening and relevance prompts.
    pub fn career_timeline(&self) -> String {
        let mut lines = Vec::new();

        if let (Some(title), Some(employer)) = (&self.current_title, &self.current_employer) {
            lines.push(format!("Current: {title} at {employer}"));
        }
        if !self.career_history.is_empty() {
            lines.push("Career history:".to_string());
            for job in &self.career_history {
                lines.push(format!(
                    "  - {} at {} ({} - {})",
                    job.title,
                    job.employer,
                    job.start_date.as_deref().unwrap_or("unknown"),
                    job.end_date.as_deref().unwrap_or("present"),
                ));
            }
        }
        if !self.boards.is_empty() {
            lines.push(format!("Board/advisory roles: {}", self.boards.join(", ")));
        }
        if !self.education.is_empty() {
            lines.push("Education:".to_string());
            for edu in &self.education {
                let mut line = format!("  - {}", edu.institution);
                if let Some(degree) = &edu.degree {
                    line.push_str(&format!(": {degree}"));
                }
                if let Some(years) = &edu.years {
                    line.push_str(&format!(" ({years})"));
                }
                lines.push(line);
            }
        }

        if lines.is_empty() {
            "No career timeline available.".to_string()
        } else {
            lines.join("\n")
        }
    }

    /// Organizations the subject is known to have been affiliated with.
    pub fn organizations(&self) -> Vec<String> {
        let mut orgs: Vec<String> = self
            .current_employer
            .iter()
            .cloned()
            .chain(self.career_history.iter().map(|c| c.employer.clone()))
            .chain(self.boards.iter().cloned())
            .chain(self.affiliations.iter().cloned())
            .collect();
        orgs.sort();
        orgs.dedup();
        orgs
    }
}

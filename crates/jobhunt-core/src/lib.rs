//! Core domain model for the job ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobhunt-core";

/// Salary value used when no compensation pattern matches.
pub const SALARY_NEGOTIABLE: &str = "Negotiable";

/// Experience value used when no seniority or years pattern matches.
pub const EXPERIENCE_NOT_SPECIFIED: &str = "Not specified";

/// Skills scored against when the operator has not declared any.
pub const DEFAULT_USER_SKILLS: &[&str] = &["AWS", "Python", "Go", "Fortinet", "SIEM", "Docker"];

/// Raw listing handed from a source fetcher to the pipeline. Not yet scored or deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub source: String,
    pub origin_url: Option<String>,
    pub posted_date: String,
}

impl Posting {
    pub fn new(title: impl Into<String>, company: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            company: company.into(),
            location: String::new(),
            description: String::new(),
            source: source.into(),
            origin_url: None,
            posted_date: Utc::now().format("%Y-%m-%d").to_string(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Blank URLs are stored as `None` so they never act as a dedup key.
    pub fn with_origin_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        let trimmed = url.trim();
        self.origin_url = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn with_posted_date(mut self, posted_date: impl Into<String>) -> Self {
        self.posted_date = posted_date.into();
        self
    }

    /// Title and description joined the way the classifier and scorer read them.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Posting plus derived attributes, ready for the persistence gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedJob {
    pub id: Uuid,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub source: String,
    pub origin_url: Option<String>,
    pub posted_date: String,
    pub skills: Vec<String>,
    pub tech_stack: Vec<String>,
    pub salary_range: String,
    pub experience: String,
    pub score: u8,
    pub created_at: DateTime<Utc>,
}

impl EnrichedJob {
    pub fn from_posting(
        posting: Posting,
        skills: Vec<String>,
        tech_stack: Vec<String>,
        salary_range: String,
        experience: String,
        score: u8,
    ) -> Self {
        let id = job_id_for(posting.origin_url.as_deref());
        Self {
            id,
            title: posting.title,
            company: posting.company,
            location: posting.location,
            description: posting.description,
            source: posting.source,
            origin_url: posting.origin_url,
            posted_date: posting.posted_date,
            skills,
            tech_stack,
            salary_range,
            experience,
            score: score.min(100),
            created_at: Utc::now(),
        }
    }

    /// Natural dedup key. `None` means the job is always inserted as a new record.
    pub fn identity_key(&self) -> Option<&str> {
        self.origin_url.as_deref()
    }
}

/// Stable id for keyed jobs so repeated passes agree on it; random otherwise.
pub fn job_id_for(origin_url: Option<&str>) -> Uuid {
    match origin_url {
        Some(url) => Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()),
        None => Uuid::new_v4(),
    }
}

/// Operator's declared competencies, snapshotted for one scoring pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSkillSet {
    name: String,
    skills: Vec<String>,
}

impl UserSkillSet {
    /// Trims entries, drops blanks and case-insensitive duplicates (first spelling kept).
    pub fn new<I, S>(name: impl Into<String>, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for skill in skills {
            let skill = skill.as_ref().trim();
            if skill.is_empty() {
                continue;
            }
            if out.iter().any(|s| s.eq_ignore_ascii_case(skill)) {
                continue;
            }
            out.push(skill.to_string());
        }
        Self {
            name: name.into(),
            skills: out,
        }
    }

    pub fn builtin_default() -> Self {
        Self::new("default", DEFAULT_USER_SKILLS.iter().copied())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn skills(&self) -> &[String] {
        &self.skills
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

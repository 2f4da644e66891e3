//! Rule-table driven classification, relevance scoring and skills-gap analysis.
//!
//! Every table lives in `rules/*.yaml` and is compiled into the binary. A rules
//! directory can override individual files at runtime; missing files fall back
//! to the embedded copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use jobhunt_core::{
    EnrichedJob, Posting, UserSkillSet, EXPERIENCE_NOT_SPECIFIED, SALARY_NEGOTIABLE,
};
use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "jobhunt-extract";

const SKILLS_FILE: &str = "skills.yaml";
const TECH_FILE: &str = "tech.yaml";
const SALARY_FILE: &str = "salary.yaml";
const EXPERIENCE_FILE: &str = "experience.yaml";
const SCORING_FILE: &str = "scoring.yaml";
const GAP_FILE: &str = "gap.yaml";

const EMBEDDED_SKILLS: &str = include_str!("../rules/skills.yaml");
const EMBEDDED_TECH: &str = include_str!("../rules/tech.yaml");
const EMBEDDED_SALARY: &str = include_str!("../rules/salary.yaml");
const EMBEDDED_EXPERIENCE: &str = include_str!("../rules/experience.yaml");
const EMBEDDED_SCORING: &str = include_str!("../rules/scoring.yaml");
const EMBEDDED_GAP: &str = include_str!("../rules/gap.yaml");

static BUILTIN: LazyLock<Enricher> = LazyLock::new(|| {
    let rules = RuleSet::embedded().expect("embedded rule tables parse");
    Enricher::from_rules(&rules).expect("embedded rule patterns compile")
});

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("reading rules file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing rules file {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid pattern `{pattern}` in {file}: {source}")]
    Pattern {
        file: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct TagRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<TagRuleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagRuleEntry {
    pattern: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SalaryRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExperienceRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<ExperienceRuleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExperienceRuleEntry {
    pattern: String,
    label: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GapRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    transferable: Vec<TransferableHint>,
}

#[derive(Debug, Clone, Deserialize)]
struct TransferableHint {
    missing: String,
    hint: String,
}

/// Scoring weights and keyword buckets, as declared in `scoring.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringRules {
    #[serde(default)]
    pub version: u32,
    pub skill_weight: u32,
    pub seniority: SeniorityRules,
    pub compensation: CompensationRules,
    pub employer: EmployerRules,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeniorityRules {
    pub buckets: Vec<SeniorityBucket>,
    pub fallback_points: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeniorityBucket {
    pub label: String,
    pub points: u32,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompensationRules {
    pub points: u32,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmployerRules {
    pub premium_points: u32,
    pub baseline_points: u32,
    pub premium: Vec<String>,
}

/// All parsed (not yet compiled) rule tables.
#[derive(Debug, Clone)]
pub struct RuleSet {
    skills: TagRulesFile,
    tech: TagRulesFile,
    salary: SalaryRulesFile,
    experience: ExperienceRulesFile,
    scoring: ScoringRules,
    gap: GapRulesFile,
}

impl RuleSet {
    pub fn embedded() -> Result<Self, RulesError> {
        Self::load(None)
    }

    /// Files present in `dir` replace their embedded counterpart.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, RulesError> {
        Self::load(Some(dir.as_ref()))
    }

    fn load(dir: Option<&Path>) -> Result<Self, RulesError> {
        Ok(Self {
            skills: parse_table(SKILLS_FILE, &rule_text(dir, SKILLS_FILE, EMBEDDED_SKILLS)?)?,
            tech: parse_table(TECH_FILE, &rule_text(dir, TECH_FILE, EMBEDDED_TECH)?)?,
            salary: parse_table(SALARY_FILE, &rule_text(dir, SALARY_FILE, EMBEDDED_SALARY)?)?,
            experience: parse_table(
                EXPERIENCE_FILE,
                &rule_text(dir, EXPERIENCE_FILE, EMBEDDED_EXPERIENCE)?,
            )?,
            scoring: parse_table(SCORING_FILE, &rule_text(dir, SCORING_FILE, EMBEDDED_SCORING)?)?,
            gap: parse_table(GAP_FILE, &rule_text(dir, GAP_FILE, EMBEDDED_GAP)?)?,
        })
    }

    pub fn scoring(&self) -> &ScoringRules {
        &self.scoring
    }
}

fn rule_text(dir: Option<&Path>, file: &str, embedded: &str) -> Result<String, RulesError> {
    let Some(dir) = dir else {
        return Ok(embedded.to_string());
    };
    let path = dir.join(file);
    if !path.exists() {
        debug!(file, dir = %dir.display(), "rules file not overridden; using embedded table");
        return Ok(embedded.to_string());
    }
    fs::read_to_string(&path).map_err(|source| RulesError::Read { path, source })
}

fn parse_table<T: DeserializeOwned>(file: &str, text: &str) -> Result<T, RulesError> {
    serde_yaml::from_str(text).map_err(|source| RulesError::Parse {
        file: file.to_string(),
        source,
    })
}

fn compile_pattern(file: &str, pattern: &str) -> Result<Regex, RulesError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| RulesError::Pattern {
            file: file.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}

#[derive(Debug, Clone)]
struct TagRule {
    regex: Regex,
    name: String,
}

#[derive(Debug, Clone)]
struct ExperienceRule {
    regex: Regex,
    label: String,
}

fn compile_tag_rules(file: &str, table: &TagRulesFile) -> Result<Vec<TagRule>, RulesError> {
    table
        .rules
        .iter()
        .map(|rule| {
            Ok(TagRule {
                regex: compile_pattern(file, &rule.pattern)?,
                name: rule.name.clone(),
            })
        })
        .collect()
}

/// Maps free text to canonical tags, a salary string and an experience label.
///
/// Every method is total: blank input short-circuits to an empty list or the
/// matching sentinel without touching any pattern.
#[derive(Debug, Clone)]
pub struct Classifier {
    skills: Vec<TagRule>,
    tech: Vec<TagRule>,
    salary: Vec<Regex>,
    experience: Vec<ExperienceRule>,
}

impl Classifier {
    pub fn from_rules(rules: &RuleSet) -> Result<Self, RulesError> {
        let salary = rules
            .salary
            .patterns
            .iter()
            .map(|p| compile_pattern(SALARY_FILE, p))
            .collect::<Result<Vec<_>, _>>()?;
        let experience = rules
            .experience
            .rules
            .iter()
            .map(|rule| {
                Ok(ExperienceRule {
                    regex: compile_pattern(EXPERIENCE_FILE, &rule.pattern)?,
                    label: rule.label.clone(),
                })
            })
            .collect::<Result<Vec<_>, RulesError>>()?;

        Ok(Self {
            skills: compile_tag_rules(SKILLS_FILE, &rules.skills)?,
            tech: compile_tag_rules(TECH_FILE, &rules.tech)?,
            salary,
            experience,
        })
    }

    pub fn from_rules_dir(dir: impl AsRef<Path>) -> Result<Self, RulesError> {
        Self::from_rules(&RuleSet::from_dir(dir)?)
    }

    pub fn builtin() -> &'static Classifier {
        &BUILTIN.classifier
    }

    pub fn extract_skills(&self, text: &str) -> Vec<String> {
        match_tags(&self.skills, text)
    }

    pub fn extract_tech_stack(&self, text: &str) -> Vec<String> {
        match_tags(&self.tech, text)
    }

    pub fn extract_salary(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return SALARY_NEGOTIABLE.to_string();
        }
        let lower = text.to_lowercase();
        self.salary
            .iter()
            .find_map(|re| re.find(&lower))
            .map(|m| title_case(m.as_str().trim()))
            .unwrap_or_else(|| SALARY_NEGOTIABLE.to_string())
    }

    pub fn extract_experience(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return EXPERIENCE_NOT_SPECIFIED.to_string();
        }
        let lower = text.to_lowercase();
        for rule in &self.experience {
            let Some(caps) = rule.regex.captures(&lower) else {
                continue;
            };
            if !rule.label.contains('$') {
                return rule.label.clone();
            }
            // A template is only usable when its group captured something.
            if caps.get(1).is_some() {
                let mut label = String::new();
                caps.expand(&rule.label, &mut label);
                return label;
            }
        }
        EXPERIENCE_NOT_SPECIFIED.to_string()
    }
}

fn match_tags(rules: &[TagRule], text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut tags: Vec<String> = Vec::new();
    for rule in rules {
        if tags.contains(&rule.name) {
            continue;
        }
        if rule.regex.is_match(text) {
            tags.push(rule.name.clone());
        }
    }
    tags
}

fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut word_start = true;
    for ch in input.chars() {
        if word_start && ch.is_alphabetic() {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        word_start = !(ch.is_alphanumeric() || ch == '_');
    }
    out
}

pub fn extract_skills(text: &str) -> Vec<String> {
    Classifier::builtin().extract_skills(text)
}

pub fn extract_tech_stack(text: &str) -> Vec<String> {
    Classifier::builtin().extract_tech_stack(text)
}

pub fn extract_salary(text: &str) -> String {
    Classifier::builtin().extract_salary(text)
}

pub fn extract_experience(text: &str) -> String {
    Classifier::builtin().extract_experience(text)
}

/// Per-signal contributions behind a relevance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub skill_overlap: u32,
    pub seniority: u32,
    pub compensation: u32,
    pub employer: u32,
    pub total: u8,
}

#[derive(Debug, Clone)]
pub struct Scorer {
    rules: ScoringRules,
}

impl Scorer {
    pub fn new(mut rules: ScoringRules) -> Self {
        for bucket in &mut rules.seniority.buckets {
            lowercase_all(&mut bucket.keywords);
        }
        lowercase_all(&mut rules.compensation.keywords);
        lowercase_all(&mut rules.employer.premium);
        Self { rules }
    }

    pub fn builtin() -> &'static Scorer {
        &BUILTIN.scorer
    }

    pub fn score(&self, posting: &Posting, skills: &UserSkillSet) -> u8 {
        self.breakdown(posting, skills).total
    }

    pub fn breakdown(&self, posting: &Posting, skills: &UserSkillSet) -> ScoreBreakdown {
        let text = format!("{} {}", posting.description, posting.title).to_lowercase();

        let skill_overlap = self.skill_overlap(&text, skills);
        let seniority = self
            .rules
            .seniority
            .buckets
            .iter()
            .find(|bucket| bucket.keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|bucket| bucket.points)
            .unwrap_or(self.rules.seniority.fallback_points);
        let compensation = if self
            .rules
            .compensation
            .keywords
            .iter()
            .any(|k| text.contains(k.as_str()))
        {
            self.rules.compensation.points
        } else {
            0
        };
        let company = posting.company.to_lowercase();
        let employer = if self
            .rules
            .employer
            .premium
            .iter()
            .any(|name| company.contains(name.as_str()))
        {
            self.rules.employer.premium_points
        } else {
            self.rules.employer.baseline_points
        };

        let sum = skill_overlap
            .saturating_add(seniority)
            .saturating_add(compensation)
            .saturating_add(employer);

        ScoreBreakdown {
            skill_overlap,
            seniority,
            compensation,
            employer,
            total: sum.min(100) as u8,
        }
    }

    fn skill_overlap(&self, text: &str, skills: &UserSkillSet) -> u32 {
        if skills.is_empty() {
            return 0;
        }
        let matched = skills
            .skills()
            .iter()
            .filter(|skill| text.contains(skill.to_lowercase().as_str()))
            .count() as u64;
        (u64::from(self.rules.skill_weight) * matched / skills.len() as u64) as u32
    }
}

fn lowercase_all(values: &mut [String]) {
    for value in values {
        *value = value.to_lowercase();
    }
}

/// Skill match / gap report for one description against the operator's skills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillsGap {
    pub matching: Vec<String>,
    pub missing: Vec<String>,
    pub transferable: Vec<String>,
    pub fit_score: u8,
    pub recommendations: Vec<String>,
}

/// Classifier + scorer pair that turns a [`Posting`] into an [`EnrichedJob`].
#[derive(Debug, Clone)]
pub struct Enricher {
    classifier: Classifier,
    scorer: Scorer,
    transferable: Vec<TransferableHint>,
}

impl Enricher {
    pub fn from_rules(rules: &RuleSet) -> Result<Self, RulesError> {
        Ok(Self {
            classifier: Classifier::from_rules(rules)?,
            scorer: Scorer::new(rules.scoring.clone()),
            transferable: rules.gap.transferable.clone(),
        })
    }

    pub fn from_rules_dir(dir: impl AsRef<Path>) -> Result<Self, RulesError> {
        Self::from_rules(&RuleSet::from_dir(dir)?)
    }

    pub fn builtin() -> &'static Enricher {
        &BUILTIN
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn enrich(&self, posting: Posting, skills: &UserSkillSet) -> EnrichedJob {
        let combined = posting.combined_text();
        let found_skills = self.classifier.extract_skills(&combined);
        let tech_stack = self.classifier.extract_tech_stack(&posting.description);
        let salary_range = self.classifier.extract_salary(&posting.description);
        let experience = self.classifier.extract_experience(&combined);
        let score = self.scorer.score(&posting, skills);
        EnrichedJob::from_posting(posting, found_skills, tech_stack, salary_range, experience, score)
    }

    pub fn analyze_gap(&self, description: &str, skills: &UserSkillSet) -> SkillsGap {
        let required = self.classifier.extract_skills(description);
        let owned: Vec<String> = skills.skills().iter().map(|s| s.to_lowercase()).collect();

        let mut matching = Vec::new();
        let mut missing = Vec::new();
        for skill in required.iter() {
            let lower = skill.to_lowercase();
            if owned
                .iter()
                .any(|own| own.contains(lower.as_str()) || lower.contains(own.as_str()))
            {
                matching.push(skill.clone());
            } else {
                missing.push(skill.clone());
            }
        }

        let fit_score = if required.is_empty() {
            0
        } else {
            (matching.len() * 100 / required.len()) as u8
        };
        let transferable: Vec<String> = missing
            .iter()
            .filter_map(|m| {
                self.transferable
                    .iter()
                    .find(|t| t.missing.eq_ignore_ascii_case(m))
                    .map(|t| t.hint.clone())
            })
            .collect();
        let recommendations = gap_recommendations(&matching, &missing, &transferable, fit_score);

        SkillsGap {
            matching,
            missing,
            transferable,
            fit_score,
            recommendations,
        }
    }
}

fn gap_recommendations(
    matching: &[String],
    missing: &[String],
    transferable: &[String],
    fit_score: u8,
) -> Vec<String> {
    let mut out = Vec::new();
    out.push(
        if fit_score >= 80 {
            "Excellent fit! Focus on highlighting your matching skills in applications."
        } else if fit_score >= 60 {
            "Good fit. Emphasize transferable skills and relevant experience."
        } else {
            "Consider upskilling in missing areas or focusing on roles with better alignment."
        }
        .to_string(),
    );
    if !missing.is_empty() {
        if missing.len() <= 3 {
            out.push(format!("Consider learning: {}", missing.join(", ")));
        } else {
            out.push(format!("Priority skills to learn: {}", missing[..3].join(", ")));
        }
    }
    if !matching.is_empty() {
        out.push(format!("Strongly emphasize: {}", matching.join(", ")));
    }
    if !missing.is_empty() && !transferable.is_empty() {
        out.push("Highlight your transferable skills to bridge experience gaps".to_string());
    }
    out
}

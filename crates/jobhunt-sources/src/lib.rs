//! Source fetcher contracts plus the selector-driven HTML fetcher used for every built-in source.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobhunt_core::Posting;
use jobhunt_storage::HttpFetcher;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

pub const CRATE_NAME: &str = "jobhunt-sources";

pub const DEFAULT_CANDIDATE_BUFFER: usize = 32;

const EMBEDDED_SOURCES_YAML: &str = include_str!("../../../sources.yaml");

const QUERY_PLACEHOLDER: &str = "{query}";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid configuration for source {source_id}: {reason}")]
    Config { source_id: String, reason: String },
    #[error("all {attempted} listing targets failed for source {source_id} (last error: {last_error})")]
    AllTargetsFailed {
        source_id: String,
        attempted: usize,
        last_error: String,
    },
}

impl SourceError {
    fn config(source_id: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            source_id: source_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Contents of `sources.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub version: u32,
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn embedded() -> Result<Self> {
        Self::from_yaml_str(EMBEDDED_SOURCES_YAML).context("parsing embedded sources.yaml")
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Reads `path` when it exists, otherwise the copy compiled into the binary.
    pub fn load_or_embedded(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "sources file not found; using embedded definitions");
            Self::embedded()
        }
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == source_id)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

fn default_true() -> bool {
    true
}

/// One listing page to fetch. `company` / `location` override whatever the cards carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTarget {
    pub url: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl ListingTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            company: None,
            location: None,
        }
    }
}

/// Where each field of a listing card lives. Every list is tried in order; first non-empty wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingLayout {
    pub card: String,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub title_from_card_text: bool,
    #[serde(default)]
    pub company: Vec<String>,
    #[serde(default)]
    pub location: Vec<String>,
    #[serde(default)]
    pub description: Vec<String>,
    #[serde(default)]
    pub link: Vec<String>,
    #[serde(default)]
    pub posted_date: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub display_name: String,
    /// Value written to `Posting::source`; defaults to the display name.
    #[serde(default)]
    pub source_label: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub targets: Vec<ListingTarget>,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub query_terms: Vec<String>,
    pub listing: ListingLayout,
    #[serde(default)]
    pub detail_selectors: Vec<String>,
    #[serde(default)]
    pub relevance_keywords: Vec<String>,
    #[serde(default)]
    pub require_company: bool,
}

impl SourceConfig {
    pub fn source_label(&self) -> &str {
        self.source_label.as_deref().unwrap_or(&self.display_name)
    }

    /// Explicit targets followed by one target per query term. Spaces in terms become `+`.
    pub fn listing_targets(&self) -> Vec<ListingTarget> {
        let mut out = self.targets.clone();
        if let Some(template) = &self.url_template {
            out.extend(self.query_terms.iter().map(|term| {
                let encoded = term.trim().replace(' ', "+");
                ListingTarget::new(template.replace(QUERY_PLACEHOLDER, &encoded))
            }));
        }
        out
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        if self.id.trim().is_empty() {
            return Err(SourceError::config(&self.display_name, "empty source id"));
        }
        if self.allowed_domains.is_empty() {
            return Err(SourceError::config(&self.id, "allowed_domains is empty"));
        }
        if let Some(template) = &self.url_template {
            if !self.query_terms.is_empty() && !template.contains(QUERY_PLACEHOLDER) {
                return Err(SourceError::config(
                    &self.id,
                    format!("url_template lacks {QUERY_PLACEHOLDER}"),
                ));
            }
        }
        let targets = self.listing_targets();
        if targets.is_empty() {
            return Err(SourceError::config(&self.id, "no listing targets"));
        }
        for target in &targets {
            parse_target_url(&self.id, &target.url)?;
        }
        ListingParser::new(self)?;
        DetailExtractor::new(&self.id, &self.detail_selectors)?;
        Ok(())
    }
}

fn parse_target_url(source_id: &str, raw: &str) -> Result<Url, SourceError> {
    let url = Url::parse(raw)
        .map_err(|e| SourceError::config(source_id, format!("bad target url {raw}: {e}")))?;
    if url.host_str().is_none() {
        return Err(SourceError::config(source_id, format!("target url {raw} has no host")));
    }
    Ok(url)
}

fn compile_selector(source_id: &str, raw: &str) -> Result<Selector, SourceError> {
    Selector::parse(raw)
        .map_err(|e| SourceError::config(source_id, format!("bad selector {raw:?}: {e}")))
}

/// Whitespace-normalised text of an element, text nodes separated by single spaces.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default)]
struct SelectorChain(Vec<Selector>);

impl SelectorChain {
    fn compile(source_id: &str, raw: &[String]) -> Result<Self, SourceError> {
        raw.iter()
            .map(|s| compile_selector(source_id, s))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    fn first_text(&self, scope: ElementRef<'_>) -> Option<String> {
        self.0.iter().find_map(|sel| {
            scope
                .select(sel)
                .map(element_text)
                .find(|text| !text.is_empty())
        })
    }

    fn first_attr(&self, scope: ElementRef<'_>, attr: &str) -> Option<String> {
        self.0.iter().find_map(|sel| {
            scope
                .select(sel)
                .filter_map(|el| el.value().attr(attr))
                .map(str::trim)
                .find(|v| !v.is_empty())
                .map(str::to_string)
        })
    }
}

fn resolve_link(page_url: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let resolved = page_url.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Compiled listing layout for one source.
#[derive(Debug, Clone)]
pub struct ListingParser {
    source_label: String,
    card: Selector,
    title: SelectorChain,
    title_from_card_text: bool,
    company: SelectorChain,
    location: SelectorChain,
    description: SelectorChain,
    link: SelectorChain,
    posted_date: SelectorChain,
    relevance_keywords: Vec<String>,
    require_company: bool,
}

impl ListingParser {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let id = config.id.as_str();
        let layout = &config.listing;
        if layout.title.is_empty() && !layout.title_from_card_text {
            return Err(SourceError::config(id, "listing layout has no title selectors"));
        }
        Ok(Self {
            source_label: config.source_label().to_string(),
            card: compile_selector(id, &layout.card)?,
            title: SelectorChain::compile(id, &layout.title)?,
            title_from_card_text: layout.title_from_card_text,
            company: SelectorChain::compile(id, &layout.company)?,
            location: SelectorChain::compile(id, &layout.location)?,
            description: SelectorChain::compile(id, &layout.description)?,
            link: SelectorChain::compile(id, &layout.link)?,
            posted_date: SelectorChain::compile(id, &layout.posted_date)?,
            relevance_keywords: config
                .relevance_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            require_company: config.require_company,
        })
    }

    fn is_relevant(&self, title: &str) -> bool {
        if self.relevance_keywords.is_empty() {
            return true;
        }
        let lower = title.to_lowercase();
        self.relevance_keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Cards in document order, minus incomplete, irrelevant, and repeated ones.
    pub fn parse(&self, html: &str, page_url: &Url, target: &ListingTarget) -> Vec<Posting> {
        let document = Html::parse_document(html);
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut out = Vec::new();

        for card in document.select(&self.card) {
            let title = self.title.first_text(card).or_else(|| {
                self.title_from_card_text
                    .then(|| element_text(card))
                    .filter(|t| !t.is_empty())
            });
            let Some(title) = title else {
                continue;
            };
            if !self.is_relevant(&title) {
                continue;
            }

            let company = target
                .company
                .clone()
                .or_else(|| self.company.first_text(card));
            if self.require_company && company.is_none() {
                debug!(title = %title, "skipping card without company");
                continue;
            }

            let link = self
                .link
                .first_attr(card, "href")
                .or_else(|| card.value().attr("href").map(str::to_string))
                .and_then(|href| resolve_link(page_url, &href));

            // Postings without a URL have no identity, so every one is kept.
            if let Some(link) = &link {
                if !seen.insert((title.clone(), link.clone())) {
                    continue;
                }
            }

            let location = target
                .location
                .clone()
                .or_else(|| self.location.first_text(card))
                .unwrap_or_default();
            let description = self.description.first_text(card).unwrap_or_default();
            let posted_date = self
                .posted_date
                .first_attr(card, "datetime")
                .or_else(|| self.posted_date.first_text(card));

            let mut posting = Posting::new(title, company.unwrap_or_default(), self.source_label.clone())
                .with_location(location)
                .with_description(description);
            if let Some(link) = link {
                posting = posting.with_origin_url(link);
            }
            if let Some(posted_date) = posted_date {
                posting = posting.with_posted_date(posted_date);
            }
            out.push(posting);
        }
        out
    }
}

/// Picks the description block of a detail page.
#[derive(Debug, Clone)]
pub struct DetailExtractor {
    selectors: SelectorChain,
    body: Selector,
}

impl DetailExtractor {
    pub fn new(source_id: &str, selectors: &[String]) -> Result<Self, SourceError> {
        Ok(Self {
            selectors: SelectorChain::compile(source_id, selectors)?,
            body: compile_selector(source_id, "body")?,
        })
    }

    /// First non-empty match in selector priority order, then the whole body, then empty.
    pub fn extract(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let root = document.root_element();
        self.selectors
            .first_text(root)
            .or_else(|| {
                document
                    .select(&self.body)
                    .map(element_text)
                    .find(|t| !t.is_empty())
            })
            .unwrap_or_default()
    }
}

/// Producer half of a source's candidate stream.
#[derive(Debug, Clone)]
pub struct CandidateSink {
    tx: mpsc::Sender<Posting>,
}

impl CandidateSink {
    /// Returns `false` once the consumer has gone away.
    pub async fn send(&self, posting: Posting) -> bool {
        self.tx.send(posting).await.is_ok()
    }
}

/// Finite, non-restartable sequence of postings; ends when the producer finishes.
#[derive(Debug)]
pub struct CandidateStream {
    rx: mpsc::Receiver<Posting>,
}

impl CandidateStream {
    pub async fn next(&mut self) -> Option<Posting> {
        self.rx.recv().await
    }
}

pub fn candidate_channel(capacity: usize) -> (CandidateSink, CandidateStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CandidateSink { tx }, CandidateStream { rx })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListingReport {
    pub targets_attempted: usize,
    pub targets_failed: usize,
    pub candidates_emitted: usize,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source_id(&self) -> &str;
    fn display_name(&self) -> &str;

    /// Pushes postings into `sink` as listing pages are parsed.
    async fn list_candidates(&self, sink: CandidateSink) -> Result<ListingReport, SourceError>;

    /// Best-effort description text; empty on any failure.
    async fn fetch_detail(&self, url: &str) -> String;
}

#[derive(Debug, Clone)]
struct ResolvedTarget {
    target: ListingTarget,
    url: Url,
}

#[derive(Debug)]
pub struct HtmlSourceFetcher {
    config: SourceConfig,
    targets: Vec<ResolvedTarget>,
    listing: ListingParser,
    detail: DetailExtractor,
    http: Arc<HttpFetcher>,
}

impl HtmlSourceFetcher {
    pub fn new(config: SourceConfig, http: Arc<HttpFetcher>) -> Result<Self, SourceError> {
        config.validate()?;
        let targets = config
            .listing_targets()
            .into_iter()
            .map(|target| {
                parse_target_url(&config.id, &target.url).map(|url| ResolvedTarget { target, url })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let listing = ListingParser::new(&config)?;
        let detail = DetailExtractor::new(&config.id, &config.detail_selectors)?;
        Ok(Self {
            config,
            targets,
            listing,
            detail,
            http,
        })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

#[async_trait]
impl SourceFetcher for HtmlSourceFetcher {
    fn source_id(&self) -> &str {
        &self.config.id
    }

    fn display_name(&self) -> &str {
        &self.config.display_name
    }

    async fn list_candidates(&self, sink: CandidateSink) -> Result<ListingReport, SourceError> {
        let source_id = self.config.id.as_str();
        let mut report = ListingReport::default();
        let mut last_error = None;

        for resolved in &self.targets {
            report.targets_attempted += 1;
            let page = match self
                .http
                .fetch_text(resolved.url.as_str(), &self.config.allowed_domains)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(source_id, url = %resolved.url, error = %err, "listing page failed; skipping");
                    report.targets_failed += 1;
                    last_error = Some(err.to_string());
                    continue;
                }
            };

            let page_url = Url::parse(&page.final_url).unwrap_or_else(|_| resolved.url.clone());
            let postings = self.listing.parse(&page.body, &page_url, &resolved.target);
            debug!(source_id, url = %page_url, cards = postings.len(), "parsed listing page");

            for posting in postings {
                if !sink.send(posting).await {
                    warn!(source_id, "candidate stream closed; stopping listing");
                    return Ok(report);
                }
                report.candidates_emitted += 1;
            }
        }

        if report.targets_attempted > 0 && report.targets_failed == report.targets_attempted {
            return Err(SourceError::AllTargetsFailed {
                source_id: source_id.to_string(),
                attempted: report.targets_attempted,
                last_error: last_error.unwrap_or_default(),
            });
        }

        info!(
            source_id,
            targets = report.targets_attempted,
            failed_targets = report.targets_failed,
            candidates = report.candidates_emitted,
            "listing complete"
        );
        Ok(report)
    }

    async fn fetch_detail(&self, url: &str) -> String {
        if url.trim().is_empty() {
            return String::new();
        }
        match self.http.fetch_text(url, &self.config.allowed_domains).await {
            Ok(page) => self.detail.extract(&page.body),
            Err(err) => {
                warn!(source_id = %self.config.id, url, error = %err, "detail fetch failed");
                String::new()
            }
        }
    }
}

/// An enabled source whose configuration could not be turned into a fetcher.
#[derive(Debug)]
pub struct RejectedSource {
    pub source_id: String,
    pub display_name: String,
    pub error: SourceError,
}

#[derive(Default)]
pub struct FetcherSet {
    pub fetchers: Vec<Arc<dyn SourceFetcher>>,
    pub rejected: Vec<RejectedSource>,
}

/// One fetcher per enabled source, all sharing `http` and its domain throttle.
/// A source with a broken configuration is rejected on its own; the rest still build.
pub fn build_fetchers(registry: &SourceRegistry, http: Arc<HttpFetcher>) -> FetcherSet {
    let mut set = FetcherSet::default();
    for config in registry.enabled() {
        match HtmlSourceFetcher::new(config.clone(), http.clone()) {
            Ok(fetcher) => set.fetchers.push(Arc::new(fetcher)),
            Err(error) => {
                warn!(source_id = %config.id, error = %error, "rejecting source with invalid configuration");
                set.rejected.push(RejectedSource {
                    source_id: config.id.clone(),
                    display_name: config.display_name.clone(),
                    error,
                });
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobhunt_storage::HttpClientConfig;
    use std::path::PathBuf;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture(source_id: &str, file: &str) -> String {
        let path = workspace_root().join("fixtures").join(source_id).join(file);
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
    }

    fn builtin(source_id: &str) -> SourceConfig {
        SourceRegistry::embedded()
            .unwrap()
            .get(source_id)
            .cloned()
            .unwrap()
    }

    fn http() -> Arc<HttpFetcher> {
        Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap())
    }

    #[test]
    fn embedded_registry_validates_every_builtin_source() {
        let registry = SourceRegistry::embedded().unwrap();
        assert_eq!(registry.version, 1);
        let ids: Vec<&str> = registry.sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["brightermonday", "fuzu", "company-careers"]);

        for source in &registry.sources {
            source.validate().unwrap();
            for target in source.listing_targets() {
                let host = Url::parse(&target.url).unwrap().host_str().unwrap().to_string();
                assert!(
                    source.allowed_domains.contains(&host),
                    "{} target {} outside allow-list",
                    source.id,
                    target.url
                );
            }
        }
    }

    #[test]
    fn workspace_sources_file_matches_embedded_copy() {
        let on_disk = SourceRegistry::load(workspace_root().join("sources.yaml")).unwrap();
        assert_eq!(on_disk.sources.len(), SourceRegistry::embedded().unwrap().sources.len());
    }

    #[test]
    fn query_terms_expand_into_encoded_targets() {
        let bm = builtin("brightermonday");
        let targets = bm.listing_targets();
        assert_eq!(targets.len(), 9);
        assert!(targets
            .iter()
            .any(|t| t.url == "https://www.brightermonday.co.ke/jobs?q=cloud+security"));

        let fuzu = builtin("fuzu");
        let urls: Vec<String> = fuzu.listing_targets().into_iter().map(|t| t.url).collect();
        assert_eq!(urls[0], "https://www.fuzu.com/kenya/technology-jobs");
        assert_eq!(urls.len(), 4);

        let companies = builtin("company-careers");
        assert_eq!(companies.listing_targets().len(), 3);
        assert_eq!(companies.source_label(), "Company Website");
    }

    #[test]
    fn invalid_selector_is_a_config_error() {
        let mut config = builtin("fuzu");
        config.listing.card = "div[".to_string();
        assert!(matches!(config.validate(), Err(SourceError::Config { .. })));

        let mut config = builtin("fuzu");
        config.allowed_domains.clear();
        assert!(matches!(config.validate(), Err(SourceError::Config { .. })));
    }

    #[test]
    fn brightermonday_listing_parses_cards_in_order() {
        let config = builtin("brightermonday");
        let parser = ListingParser::new(&config).unwrap();
        let page_url = Url::parse("https://www.brightermonday.co.ke/jobs?q=soc").unwrap();
        let postings = parser.parse(
            &fixture("brightermonday", "listing.html"),
            &page_url,
            &ListingTarget::new(page_url.as_str()),
        );

        assert_eq!(postings.len(), 2, "company-less and repeated cards are dropped");
        let first = &postings[0];
        assert_eq!(first.title, "SOC Analyst");
        assert_eq!(first.company, "Safaricom PLC");
        assert_eq!(first.location, "Nairobi");
        assert_eq!(
            first.description,
            "Monitor SIEM alerts and respond to incidents. 3 years experience required."
        );
        assert_eq!(
            first.origin_url.as_deref(),
            Some("https://www.brightermonday.co.ke/listings/soc-analyst-abc123")
        );
        assert_eq!(first.posted_date, "2024-05-02");
        assert_eq!(first.source, "BrighterMonday");

        let second = &postings[1];
        assert_eq!(second.title, "Cloud Security Engineer");
        assert_eq!(second.company, "KCB Group");
        assert_eq!(second.location, "Mombasa");
        assert_eq!(
            second.origin_url.as_deref(),
            Some("https://www.brightermonday.co.ke/listings/cloud-security-engineer-xyz")
        );
    }

    #[test]
    fn fuzu_listing_falls_back_through_selector_lists() {
        let config = builtin("fuzu");
        let parser = ListingParser::new(&config).unwrap();
        let page_url = Url::parse("https://www.fuzu.com/kenya/technology-jobs").unwrap();
        let postings = parser.parse(
            &fixture("fuzu", "listing.html"),
            &page_url,
            &ListingTarget::new(page_url.as_str()),
        );

        let titles: Vec<&str> = postings.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Cloud Security Engineer", "Network Administrator"]);
        assert_eq!(postings[0].company, "Equity Bank");
        assert_eq!(postings[0].location, "Nairobi");
        assert_eq!(
            postings[0].origin_url.as_deref(),
            Some("https://www.fuzu.com/kenya/jobs/cloud-security-engineer-123")
        );
        assert_eq!(postings[1].company, "Andela");
        assert_eq!(postings[1].location, "");
        assert_eq!(postings[1].description, "");
    }

    #[test]
    fn company_careers_apply_relevance_filter_and_fixed_company() {
        let config = builtin("company-careers");
        let parser = ListingParser::new(&config).unwrap();
        let target = config.listing_targets().remove(0);
        let page_url = Url::parse(&target.url).unwrap();
        let postings = parser.parse(&fixture("company-careers", "safaricom.html"), &page_url, &target);

        let summary: Vec<(&str, Option<&str>)> = postings
            .iter()
            .map(|p| (p.title.as_str(), p.origin_url.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (
                    "Cyber Security Analyst",
                    Some("https://www.safaricom.co.ke/careers/cyber-security-analyst")
                ),
                (
                    "Cloud Engineer",
                    Some("https://www.safaricom.co.ke/careers/jobs/cloud-engineer")
                ),
            ]
        );
        for posting in &postings {
            assert_eq!(posting.company, "Safaricom");
            assert_eq!(posting.location, "Nairobi, Kenya");
            assert_eq!(posting.source, "Company Website");
        }
    }

    #[test]
    fn detail_extraction_prefers_selector_priority_over_document_order() {
        let extractor = DetailExtractor::new("fuzu", &builtin("fuzu").detail_selectors).unwrap();
        let text = extractor.extract(&fixture("detail", "job_description.html"));
        assert_eq!(
            text,
            "We need a Senior Security Engineer with 5 years experience. Skills: AWS, SIEM, Fortinet. Salary: KSH 250,000 - 300,000."
        );
    }

    #[test]
    fn detail_extraction_falls_back_to_body_then_empty() {
        let extractor = DetailExtractor::new("fuzu", &builtin("fuzu").detail_selectors).unwrap();
        assert_eq!(
            extractor.extract(&fixture("detail", "body_only.html")),
            "Network Engineer Cisco and Fortinet firewalls."
        );
        assert_eq!(extractor.extract("<html><body>   </body></html>"), "");
    }

    #[test]
    fn relative_links_resolve_against_page_url() {
        let base = Url::parse("https://www.kcbgroup.com/careers/").unwrap();
        assert_eq!(
            resolve_link(&base, "soc-analyst").as_deref(),
            Some("https://www.kcbgroup.com/careers/soc-analyst")
        );
        assert_eq!(resolve_link(&base, "#top"), None);
        assert_eq!(resolve_link(&base, "mailto:hr@kcbgroup.com"), None);
    }

    #[tokio::test]
    async fn source_fails_only_when_every_target_fails() {
        let mut config = builtin("fuzu");
        config.allowed_domains = vec!["www.fuzu.com".to_string()];
        config.url_template = Some("https://blocked.invalid/{query}".to_string());
        config.query_terms = vec!["security".to_string(), "cloud".to_string()];

        let fetcher = HtmlSourceFetcher::new(config, http()).unwrap();
        let (sink, mut stream) = candidate_channel(DEFAULT_CANDIDATE_BUFFER);
        let err = fetcher.list_candidates(sink).await.unwrap_err();
        match err {
            SourceError::AllTargetsFailed { source_id, attempted, .. } => {
                assert_eq!(source_id, "fuzu");
                assert_eq!(attempted, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(stream.next().await.is_none(), "stream ends once the sink is dropped");
    }

    #[tokio::test]
    async fn detail_fetch_outside_allow_list_yields_empty_text() {
        let fetcher = HtmlSourceFetcher::new(builtin("company-careers"), http()).unwrap();
        assert_eq!(fetcher.fetch_detail("https://example.org/job/1").await, "");
        assert_eq!(fetcher.fetch_detail("").await, "");
    }

    #[test]
    fn build_fetchers_skips_disabled_sources() {
        let mut registry = SourceRegistry::embedded().unwrap();
        registry.sources[1].enabled = false;
        let set = build_fetchers(&registry, http());
        let ids: Vec<&str> = set.fetchers.iter().map(|f| f.source_id()).collect();
        assert_eq!(ids, vec!["brightermonday", "company-careers"]);
        assert!(set.rejected.is_empty());
    }

    #[test]
    fn broken_source_is_rejected_without_blocking_siblings() {
        let mut registry = SourceRegistry::embedded().unwrap();
        registry.sources[2].listing.card = "div[".to_string();
        let set = build_fetchers(&registry, http());

        let ids: Vec<&str> = set.fetchers.iter().map(|f| f.source_id()).collect();
        assert_eq!(ids, vec!["brightermonday", "fuzu"]);
        assert_eq!(set.rejected.len(), 1);
        assert_eq!(set.rejected[0].source_id, "company-careers");
        assert!(matches!(set.rejected[0].error, SourceError::Config { .. }));
    }

    #[test]
    fn url_less_cards_with_the_same_title_are_all_kept() {
        let parser = ListingParser::new(&builtin("company-careers")).unwrap();
        let target = builtin("company-careers").listing_targets().remove(0);
        let page_url = Url::parse(&target.url).unwrap();
        let html = "<html><body>\
            <div class='job-listing'><h3>Security Analyst</h3></div>\
            <div class='job-listing'><h3>Security Analyst</h3></div>\
            </body></html>";

        let postings = parser.parse(html, &page_url, &target);
        assert_eq!(postings.len(), 2);
        assert!(postings.iter().all(|p| p.origin_url.is_none()));
    }
}

//! Polite HTTP fetching and the job persistence gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use jobhunt_core::EnrichedJob;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use url::Url;

pub const CRATE_NAME: &str = "jobhunt-storage";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Per-domain politeness shared by every fetcher that talks to the same host.
#[derive(Debug, Clone, Copy)]
pub struct PolitenessPolicy {
    pub per_domain_concurrency: usize,
    pub request_delay: Duration,
}

impl Default for PolitenessPolicy {
    fn default() -> Self {
        Self {
            per_domain_concurrency: 1,
            request_delay: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub politeness: PolitenessPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            politeness: PolitenessPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct DomainGate {
    permits: Arc<Semaphore>,
    last_request: Mutex<Option<Instant>>,
}

/// Concurrency cap plus minimum spacing between requests, keyed by host.
#[derive(Debug)]
pub struct DomainThrottle {
    policy: PolitenessPolicy,
    gates: Mutex<HashMap<String, Arc<DomainGate>>>,
}

/// Held for the duration of one request; releases the domain slot on drop.
#[derive(Debug)]
pub struct DomainPermit {
    _permit: OwnedSemaphorePermit,
}

impl DomainThrottle {
    pub fn new(policy: PolitenessPolicy) -> Self {
        Self {
            policy,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> PolitenessPolicy {
        self.policy
    }

    async fn gate(&self, domain: &str) -> Arc<DomainGate> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(domain.to_ascii_lowercase())
            .or_insert_with(|| {
                Arc::new(DomainGate {
                    permits: Arc::new(Semaphore::new(self.policy.per_domain_concurrency.max(1))),
                    last_request: Mutex::new(None),
                })
            })
            .clone()
    }

    pub async fn acquire(&self, domain: &str) -> DomainPermit {
        let gate = self.gate(domain).await;
        let permit = gate
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("domain semaphore not closed");

        // Holding the lock while sleeping keeps spacing intact under concurrent callers.
        let mut last = gate.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.policy.request_delay {
                let wait = self.policy.request_delay - elapsed;
                debug!(domain, wait_ms = wait.as_millis() as u64, "throttling request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());

        DomainPermit { _permit: permit }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("domain {domain} is not in the allow-list")]
    DomainNotAllowed { domain: String },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub body: String,
}

/// GET-only client with browser-like headers, a fixed timeout and a shared [`DomainThrottle`].
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    throttle: DomainThrottle,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            throttle: DomainThrottle::new(config.politeness),
        })
    }

    pub fn throttle(&self) -> &DomainThrottle {
        &self.throttle
    }

    /// Fetches `url` as text if its host is in `allowed_domains`.
    pub async fn fetch_text(
        &self,
        url: &str,
        allowed_domains: &[String],
    ) -> Result<FetchedPage, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let host = parsed
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            })?;
        if !domain_allowed(&host, allowed_domains) {
            return Err(FetchError::DomainNotAllowed { domain: host });
        }

        let _permit = self.throttle.acquire(&host).await;

        let span = info_span!("http_fetch", domain = %host, url);
        async {
            let resp = self
                .client
                .get(parsed)
                .send()
                .await
                .map_err(|source| FetchError::Request {
                    url: url.to_string(),
                    source,
                })?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.text().await.map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
            debug!(bytes = body.len(), "fetched page");
            Ok(FetchedPage { final_url, body })
        }
        .instrument(span)
        .await
    }
}

/// Exact, case-insensitive host match. An empty allow-list admits nothing.
pub fn domain_allowed(host: &str, allowed_domains: &[String]) -> bool {
    allowed_domains
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(host))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Persistence gateway consumed by the ingest pipeline.
///
/// Implementations must serialise concurrent writes for the same identity key:
/// the stored record after N upserts equals some sequential order of them.
/// Jobs without an identity key are always stored as new records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_job(&self, job: &EnrichedJob) -> Result<UpsertOutcome, StoreError>;

    async fn user_skills(&self) -> Result<Vec<String>, StoreError>;
}

/// Copies the fields a conflicting write may change. Identity key, id and
/// creation time always stay with the first record.
fn apply_mutable_fields(existing: &mut EnrichedJob, incoming: &EnrichedJob) {
    existing.title = incoming.title.clone();
    existing.company = incoming.company.clone();
    existing.location = incoming.location.clone();
    existing.description = incoming.description.clone();
    existing.salary_range = incoming.salary_range.clone();
    existing.experience = incoming.experience.clone();
    existing.posted_date = incoming.posted_date.clone();
    existing.source = incoming.source.clone();
    existing.score = incoming.score;
    existing.skills = incoming.skills.clone();
    existing.tech_stack = incoming.tech_stack.clone();
}

#[derive(Debug, Default)]
struct MemoryState {
    keyed: HashMap<String, EnrichedJob>,
    unkeyed: Vec<EnrichedJob>,
}

/// In-process store with the same conflict contract as [`PgJobStore`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
    user_skills: Vec<String>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_skills<I, S>(skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(MemoryState::default()),
            user_skills: skills.into_iter().map(Into::into).collect(),
        }
    }

    pub async fn get(&self, url: &str) -> Option<EnrichedJob> {
        self.state.lock().await.keyed.get(url).cloned()
    }

    pub async fn jobs(&self) -> Vec<EnrichedJob> {
        let state = self.state.lock().await;
        let mut jobs: Vec<EnrichedJob> = state.keyed.values().cloned().collect();
        jobs.extend(state.unkeyed.iter().cloned());
        jobs.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.title.cmp(&b.title)));
        jobs
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.keyed.len() + state.unkeyed.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert_job(&self, job: &EnrichedJob) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let Some(key) = job.identity_key() else {
            state.unkeyed.push(job.clone());
            return Ok(UpsertOutcome::Inserted);
        };
        match state.keyed.get_mut(key) {
            Some(existing) => {
                apply_mutable_fields(existing, job);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state.keyed.insert(key.to_string(), job.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn user_skills(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.user_skills.clone())
    }
}

const UPSERT_JOB_SQL: &str = r#"
INSERT INTO jobs (
    id, title, company, location, description, salary_range, experience,
    posted_date, source, url, score, skills, tech_stack, created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
ON CONFLICT (url) DO UPDATE SET
    title = EXCLUDED.title,
    company = EXCLUDED.company,
    location = EXCLUDED.location,
    description = EXCLUDED.description,
    salary_range = EXCLUDED.salary_range,
    experience = EXCLUDED.experience,
    posted_date = EXCLUDED.posted_date,
    source = EXCLUDED.source,
    score = EXCLUDED.score,
    skills = EXCLUDED.skills,
    tech_stack = EXCLUDED.tech_stack
RETURNING (xmax = 0) AS inserted
"#;

const INSERT_JOB_SQL: &str = r#"
INSERT INTO jobs (
    id, title, company, location, description, salary_range, experience,
    posted_date, source, url, score, skills, tech_stack, created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
"#;

/// Postgres gateway. Same-key races resolve inside `INSERT ... ON CONFLICT`.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn bind_job<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    job: &'q EnrichedJob,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(job.id)
        .bind(&job.title)
        .bind(&job.company)
        .bind(&job.location)
        .bind(&job.description)
        .bind(&job.salary_range)
        .bind(&job.experience)
        .bind(&job.posted_date)
        .bind(&job.source)
        .bind(job.origin_url.as_deref())
        .bind(i16::from(job.score))
        .bind(Json(&job.skills))
        .bind(Json(&job.tech_stack))
        .bind(job.created_at)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn upsert_job(&self, job: &EnrichedJob) -> Result<UpsertOutcome, StoreError> {
        if job.identity_key().is_none() {
            bind_job(sqlx::query(INSERT_JOB_SQL), job)
                .execute(&self.pool)
                .await?;
            return Ok(UpsertOutcome::Inserted);
        }

        let row = bind_job(sqlx::query(UPSERT_JOB_SQL), job)
            .fetch_one(&self.pool)
            .await?;
        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn user_skills(&self) -> Result<Vec<String>, StoreError> {
        let skills = sqlx::query_scalar::<_, String>("SELECT skill FROM user_skills ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(skills)
    }
}

//! Pipeline stages.
//!
//! Each stage is constructed once, shared by every replica through an
//! `Arc`, and consumes a [`Job`] by value, returning it with the stage's
//! contribution recorded. Stages only ever see unsettled jobs: the worker
//! loop in [`crate::pipeline`] forwards settled jobs untouched.

use std::future::Future;

use crate::error::AppError;
use crate::jitter::JitterConfig;
use crate::job::{Job, MarkBadPolicy};
use crate::models::PersistOutcome;
use crate::traits::{Extractor, PortalFetcher, PropertyStore, ProxyPool};
use crate::user_agent::UserAgents;
use crate::util::property_id_from_url;

/// One step of the per-job stage chain.
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn process(&self, job: Job) -> impl Future<Output = Job> + Send;
}

fn as_persistence_error(err: AppError) -> AppError {
    match err {
        AppError::PersistenceError(_) => err,
        other => AppError::PersistenceError(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Duplicate filter
// ---------------------------------------------------------------------------

/// Skips identifiers that are already stored, before any network work.
pub struct DuplicateFilter<S> {
    store: S,
}

impl<S: PropertyStore> DuplicateFilter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: PropertyStore> Stage for DuplicateFilter<S> {
    fn name(&self) -> &'static str {
        "dedup"
    }

    async fn process(&self, mut job: Job) -> Job {
        let property_id = match property_id_from_url(&job.url) {
            Ok(id) => id,
            Err(e) => return job.fail(e),
        };
        job.property_id = Some(property_id);

        match self.store.exists(property_id).await {
            Ok(true) => {
                tracing::debug!(job_id = job.id, property_id, "Property already stored");
                job.duplicate = true;
                job
            }
            Ok(false) => job,
            Err(e) => job.fail(as_persistence_error(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Proxy assignment
// ---------------------------------------------------------------------------

pub struct ProxyAssigner<P> {
    pool: P,
}

impl<P: ProxyPool> ProxyAssigner<P> {
    pub fn new(pool: P) -> Self {
        Self { pool }
    }
}

impl<P: ProxyPool> Stage for ProxyAssigner<P> {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn process(&self, mut job: Job) -> Job {
        match self.pool.select_next().await {
            Ok(proxy) => {
                tracing::debug!(job_id = job.id, proxy = %proxy.ip, uses = proxy.uses, "Proxy assigned");
                job.proxy = Some(proxy);
                job
            }
            Err(e) => job.fail(e),
        }
    }
}

// ---------------------------------------------------------------------------
// User-agent assignment
// ---------------------------------------------------------------------------

pub struct UserAgentAssigner {
    agents: UserAgents,
}

impl UserAgentAssigner {
    pub fn new(agents: UserAgents) -> Self {
        Self { agents }
    }
}

impl Stage for UserAgentAssigner {
    fn name(&self) -> &'static str {
        "user-agent"
    }

    async fn process(&self, mut job: Job) -> Job {
        match self.agents.pick() {
            Ok(ua) => {
                job.user_agent = Some(ua);
                job
            }
            Err(e) => job.fail(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Session warm-up
// ---------------------------------------------------------------------------

/// Primes the portal session through the job's proxy and identity, then
/// pauses for a jittered delay.
pub struct SessionWarmer<F, P> {
    fetcher: F,
    pool: P,
    policy: MarkBadPolicy,
    jitter: JitterConfig,
}

impl<F: PortalFetcher, P: ProxyPool> SessionWarmer<F, P> {
    pub fn new(fetcher: F, pool: P, policy: MarkBadPolicy, jitter: JitterConfig) -> Self {
        Self {
            fetcher,
            pool,
            policy,
            jitter,
        }
    }

    async fn retire_proxy(&self, job: &Job, reason: &str) {
        let Some(proxy) = &job.proxy else {
            return;
        };
        match self.pool.mark_bad(&proxy.ip).await {
            Ok(()) => tracing::info!(job_id = job.id, proxy = %proxy.ip, %reason, "Proxy marked bad"),
            Err(e) => {
                tracing::warn!(job_id = job.id, proxy = %proxy.ip, error = %e, "Failed to mark proxy bad")
            }
        }
    }
}

impl<F: PortalFetcher, P: ProxyPool> Stage for SessionWarmer<F, P> {
    fn name(&self) -> &'static str {
        "warm-up"
    }

    async fn process(&self, mut job: Job) -> Job {
        let identity = match job.identity() {
            Ok(identity) => identity,
            Err(e) => return job.fail(e),
        };

        match self.fetcher.warm_up(&identity).await {
            Ok(cookies) => {
                if self.policy == MarkBadPolicy::OnSuccess {
                    self.retire_proxy(&job, "single-use").await;
                }
                job.cookies = Some(cookies);
                self.jitter.pause().await;
                job
            }
            Err(e) => {
                if self.policy == MarkBadPolicy::OnFailure && e.is_network() {
                    self.retire_proxy(&job, "warm-up failed").await;
                }
                job.fail(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Detail fetch
// ---------------------------------------------------------------------------

pub struct DetailFetcher<F> {
    fetcher: F,
}

impl<F: PortalFetcher> DetailFetcher<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: PortalFetcher> Stage for DetailFetcher<F> {
    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn process(&self, mut job: Job) -> Job {
        let identity = match job.identity() {
            Ok(identity) => identity,
            Err(e) => return job.fail(e),
        };
        let cookies = job.cookies.clone().unwrap_or_default();

        match self
            .fetcher
            .fetch_detail(&job.url, &identity, &cookies)
            .await
        {
            Ok(body) => {
                tracing::debug!(job_id = job.id, bytes = body.len(), "Fetched detail page");
                job.body = Some(body);
                job
            }
            Err(e) => job.fail(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Record extraction
// ---------------------------------------------------------------------------

/// Runs the extractor on a blocking thread and checks the record belongs
/// to the requested property.
pub struct RecordExtractor<E> {
    extractor: E,
}

impl<E: Extractor> RecordExtractor<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }
}

impl<E: Extractor> Stage for RecordExtractor<E> {
    fn name(&self) -> &'static str {
        "extract"
    }

    async fn process(&self, mut job: Job) -> Job {
        let Some(body) = job.body.take() else {
            return job.fail(AppError::ParseError("no response body to parse".into()));
        };

        let extractor = self.extractor.clone();
        let parsed = tokio::task::spawn_blocking(move || extractor.extract(&body))
            .await
            .map_err(|e| AppError::ParseError(format!("extractor panicked: {e}")))
            .and_then(|result| result);

        let record = match parsed {
            Ok(record) => record,
            Err(AppError::ParseError(msg)) => return job.fail(AppError::ParseError(msg)),
            Err(other) => return job.fail(AppError::ParseError(other.to_string())),
        };

        if let Some(expected) = job.property_id {
            if record.property_id != expected {
                return job.fail(AppError::ParseError(format!(
                    "page describes property {} but {} was requested",
                    record.property_id, expected
                )));
            }
        }

        job.record = Some(record);
        job
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub struct Persister<S> {
    store: S,
}

impl<S: PropertyStore> Persister<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: PropertyStore> Stage for Persister<S> {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn process(&self, mut job: Job) -> Job {
        let Some(record) = job.record.as_ref() else {
            return job.fail(AppError::ParseError("no record to persist".into()));
        };

        match self.store.persist(record).await {
            Ok(PersistOutcome::Inserted) => {
                job.persisted = true;
                job
            }
            Ok(PersistOutcome::Duplicate) => {
                tracing::debug!(job_id = job.id, property_id = record.property_id, "Lost insert race, treating as duplicate");
                job.duplicate = true;
                job
            }
            Err(e) => job.fail(as_persistence_error(e)),
        }
    }
}

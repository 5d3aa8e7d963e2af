//! Replicated stage-chain orchestration.
//!
//! ```text
//!                      ┌─ intake ─ dedup ─ proxy ─ ua ─ warm-up ─ fetch ─ extract ─ persist ─┐
//! generator ─ source ──┼─ ...  (one chain per replica)                                        ├─ fan_in ─ report
//!                      └─ intake ─ dedup ─ proxy ─ ua ─ warm-up ─ fetch ─ extract ─ persist ─┘
//! ```
//!
//! Every arrow is an mpsc channel of capacity 1, so a stage cannot run
//! ahead of its downstream neighbour by more than one job. Each task
//! exits when its input closes or the cancellation token fires, and
//! dropping its sender closes the next channel. The fan-in channel
//! therefore closes once every replica has drained, and [`Pipeline::run`]
//! joins every spawned task before returning.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobOutcome, JobSummary, PipelineConfig};
use crate::stages::{
    DetailFetcher, DuplicateFilter, Persister, ProxyAssigner, RecordExtractor, SessionWarmer,
    Stage, UserAgentAssigner,
};
use crate::traits::{Extractor, PortalFetcher, PropertyStore, ProxyPool};
use crate::user_agent::UserAgents;

/// Buffer size of every hand-off channel.
const HANDOFF_CAPACITY: usize = 1;

/// Events emitted by the pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    Started { jobs: usize, replicas: usize },
    JobFinished { summary: &'a JobSummary },
    Finished { report: &'a PipelineReport },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPipelineReporter;

impl PipelineReporter for TracingPipelineReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::Started { jobs, replicas } => {
                tracing::info!(%jobs, %replicas, "Pipeline started");
            }
            PipelineEvent::JobFinished { summary } => match summary.outcome {
                JobOutcome::Persisted => tracing::info!(
                    job_id = summary.id,
                    replica = ?summary.replica,
                    property_id = ?summary.property_id,
                    proxy = ?summary.proxy,
                    "Property persisted"
                ),
                JobOutcome::Duplicate => tracing::info!(
                    job_id = summary.id,
                    property_id = ?summary.property_id,
                    "Property already stored, skipped"
                ),
                JobOutcome::Failed(kind) => tracing::warn!(
                    job_id = summary.id,
                    url = %summary.url,
                    %kind,
                    error = summary.error.as_deref().unwrap_or_default(),
                    "Job failed"
                ),
                JobOutcome::Pending => tracing::warn!(
                    job_id = summary.id,
                    url = %summary.url,
                    "Job left the pipeline unfinished"
                ),
            },
            PipelineEvent::Finished { report } => {
                tracing::info!(
                    total = report.total,
                    persisted = report.persisted,
                    duplicates = report.duplicates,
                    failed = report.failed_total(),
                    cancelled = report.cancelled,
                    "Pipeline finished"
                );
            }
        }
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    /// Jobs submitted.
    pub total: usize,
    pub persisted: usize,
    pub duplicates: usize,
    /// Failed jobs per [`crate::AppError::kind`] label.
    pub failed: BTreeMap<&'static str, usize>,
    /// True if the run was cut short by the cancellation token.
    pub cancelled: bool,
    /// Every job that reached the aggregator, ordered by job id.
    pub jobs: Vec<JobSummary>,
}

impl PipelineReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, summary: JobSummary) {
        match summary.outcome {
            JobOutcome::Persisted => self.persisted += 1,
            JobOutcome::Duplicate => self.duplicates += 1,
            JobOutcome::Failed(kind) => *self.failed.entry(kind).or_default() += 1,
            JobOutcome::Pending => {}
        }
        self.jobs.push(summary);
    }

    pub fn failed_total(&self) -> usize {
        self.failed.values().sum()
    }

    /// Jobs that never reached the aggregator (only non-zero after cancellation).
    pub fn unaccounted(&self) -> usize {
        self.total.saturating_sub(self.jobs.len())
    }
}

/// The scraping pipeline: shared stage objects plus topology settings.
pub struct Pipeline<S, P, F, E>
where
    S: PropertyStore,
    P: ProxyPool,
    F: PortalFetcher,
    E: Extractor,
{
    dedup: Arc<DuplicateFilter<S>>,
    proxy: Arc<ProxyAssigner<P>>,
    user_agent: Arc<UserAgentAssigner>,
    warm_up: Arc<SessionWarmer<F, P>>,
    fetch: Arc<DetailFetcher<F>>,
    extract: Arc<RecordExtractor<E>>,
    persist: Arc<Persister<S>>,
    config: PipelineConfig,
}

impl<S, P, F, E> Pipeline<S, P, F, E>
where
    S: PropertyStore,
    P: ProxyPool,
    F: PortalFetcher,
    E: Extractor,
{
    pub fn new(
        store: S,
        pool: P,
        fetcher: F,
        extractor: E,
        user_agents: UserAgents,
        config: PipelineConfig,
    ) -> Self {
        Self {
            dedup: Arc::new(DuplicateFilter::new(store.clone())),
            proxy: Arc::new(ProxyAssigner::new(pool.clone())),
            user_agent: Arc::new(UserAgentAssigner::new(user_agents)),
            warm_up: Arc::new(SessionWarmer::new(
                fetcher.clone(),
                pool,
                config.mark_bad,
                config.warmup_jitter,
            )),
            fetch: Arc::new(DetailFetcher::new(fetcher)),
            extract: Arc::new(RecordExtractor::new(extractor)),
            persist: Arc::new(Persister::new(store)),
            config,
        }
    }

    /// Push every URL through the replicated stage chains and collect the
    /// results.
    ///
    /// Returns once all spawned tasks have finished: either every job has
    /// reached the aggregator, or `cancel` fired and the tasks drained.
    pub async fn run<R: PipelineReporter>(
        &self,
        urls: Vec<String>,
        cancel: CancellationToken,
        reporter: &R,
    ) -> PipelineReport {
        let replicas = self.config.replicas.max(1);
        let mut report = PipelineReport::new(urls.len());
        reporter.report(PipelineEvent::Started {
            jobs: urls.len(),
            replicas,
        });

        let mut tasks = JoinSet::new();
        let source = generate(&mut tasks, urls, cancel.clone());
        let source = Arc::new(Mutex::new(source));

        let outputs: Vec<_> = (0..replicas)
            .map(|replica| self.spawn_replica(&mut tasks, replica, source.clone(), &cancel))
            .collect();
        drop(source);

        let mut results = fan_in(&mut tasks, outputs, cancel.clone());
        while let Some(job) = results.recv().await {
            let summary = job.summary();
            reporter.report(PipelineEvent::JobFinished { summary: &summary });
            report.record(summary);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Pipeline task panicked");
            }
        }

        report.cancelled = cancel.is_cancelled();
        report.jobs.sort_by_key(|summary| summary.id);
        reporter.report(PipelineEvent::Finished { report: &report });
        report
    }

    fn spawn_replica(
        &self,
        tasks: &mut JoinSet<()>,
        replica: usize,
        source: Arc<Mutex<mpsc::Receiver<Job>>>,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<Job> {
        let rx = intake(tasks, replica, source, cancel.clone());
        let rx = spawn_stage(tasks, self.dedup.clone(), rx, cancel.clone());
        let rx = spawn_stage(tasks, self.proxy.clone(), rx, cancel.clone());
        let rx = spawn_stage(tasks, self.user_agent.clone(), rx, cancel.clone());
        let rx = spawn_stage(tasks, self.warm_up.clone(), rx, cancel.clone());
        let rx = spawn_stage(tasks, self.fetch.clone(), rx, cancel.clone());
        let rx = spawn_stage(tasks, self.extract.clone(), rx, cancel.clone());
        spawn_stage(tasks, self.persist.clone(), rx, cancel.clone())
    }
}

/// Emit one job per URL, ids in input order.
fn generate(
    tasks: &mut JoinSet<()>,
    urls: Vec<String>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Job> {
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    tasks.spawn(async move {
        for (id, url) in urls.into_iter().enumerate() {
            let job = Job::new(id as u64, url);
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = tx.send(job) => if sent.is_err() { break },
            }
        }
    });
    rx
}

/// Claim jobs from the shared source for one replica.
fn intake(
    tasks: &mut JoinSet<()>,
    replica: usize,
    source: Arc<Mutex<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Job> {
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    tasks.spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                job = async { source.lock().await.recv().await } => job,
            };
            let Some(mut job) = next else { break };
            job.replica = Some(replica);

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = tx.send(job) => if sent.is_err() { break },
            }
        }
    });
    rx
}

/// Run one stage over a channel. Settled jobs pass through untouched.
pub fn spawn_stage<St: Stage>(
    tasks: &mut JoinSet<()>,
    stage: Arc<St>,
    mut input: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Job> {
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    tasks.spawn(async move {
        loop {
            let job = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                job = input.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let job = if job.is_settled() {
                job
            } else {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    job = stage.process(job) => job,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = tx.send(job) => if sent.is_err() { break },
            }
        }
        tracing::trace!(stage = stage.name(), "Stage worker stopped");
    });
    rx
}

/// Merge several job streams into one.
///
/// The merged stream closes only after every input has closed.
pub fn fan_in(
    tasks: &mut JoinSet<()>,
    inputs: Vec<mpsc::Receiver<Job>>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Job> {
    let (tx, merged) = mpsc::channel(HANDOFF_CAPACITY);
    for mut input in inputs {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                let job = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    job = input.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = tx.send(job) => if sent.is_err() { break },
                }
            }
        });
    }
    merged
}

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::AppError;
use crate::jitter::JitterConfig;
use crate::models::{Identity, PropertyRecord, Proxy, SessionCookies};

/// One URL's passage through the pipeline.
///
/// Moved by value from stage to stage; no two stages ever hold the same job.
#[derive(Debug, Clone)]
pub struct Job {
    /// Position of the URL in the input list.
    pub id: u64,
    /// Replica that claimed the job from the shared source.
    pub replica: Option<usize>,
    pub url: String,
    pub property_id: Option<i64>,
    pub proxy: Option<Proxy>,
    pub user_agent: Option<String>,
    pub cookies: Option<SessionCookies>,
    pub body: Option<Vec<u8>>,
    pub record: Option<PropertyRecord>,
    pub duplicate: bool,
    pub persisted: bool,
    pub error: Option<AppError>,
}

impl Job {
    pub fn new(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            replica: None,
            url: url.into(),
            property_id: None,
            proxy: None,
            user_agent: None,
            cookies: None,
            body: None,
            record: None,
            duplicate: false,
            persisted: false,
            error: None,
        }
    }

    /// A settled job carries a terminal error or the duplicate flag; later
    /// stages forward it without doing any work.
    pub fn is_settled(&self) -> bool {
        self.error.is_some() || self.duplicate
    }

    /// Record a terminal error. The first error wins.
    pub fn fail(mut self, error: AppError) -> Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    /// The identity assembled by the proxy and user-agent stages.
    pub fn identity(&self) -> Result<Identity, AppError> {
        let user_agent = self
            .user_agent
            .clone()
            .ok_or_else(|| AppError::Generic("job has no user agent assigned".into()))?;
        Ok(Identity {
            proxy: self.proxy.clone(),
            user_agent,
        })
    }

    pub fn outcome(&self) -> JobOutcome {
        match (&self.error, self.duplicate, self.persisted) {
            (Some(e), _, _) => JobOutcome::Failed(e.kind()),
            (None, true, _) => JobOutcome::Duplicate,
            (None, false, true) => JobOutcome::Persisted,
            (None, false, false) => JobOutcome::Pending,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            replica: self.replica,
            url: self.url.clone(),
            property_id: self.property_id,
            proxy: self.proxy.as_ref().map(|p| p.ip.clone()),
            outcome: self.outcome(),
            error: self.error.as_ref().map(ToString::to_string),
        }
    }
}

/// How a job left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "kind")]
pub enum JobOutcome {
    Persisted,
    /// Already stored; skipped without network work.
    Duplicate,
    /// Job-fatal error, labelled by [`AppError::kind`].
    Failed(&'static str),
    /// Still travelling through the stages.
    Pending,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Persisted => write!(f, "persisted"),
            JobOutcome::Duplicate => write!(f, "duplicate"),
            JobOutcome::Failed(kind) => write!(f, "failed ({kind})"),
            JobOutcome::Pending => write!(f, "pending"),
        }
    }
}

/// Per-job line of the final report.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: u64,
    pub replica: Option<usize>,
    pub url: String,
    pub property_id: Option<i64>,
    pub proxy: Option<String>,
    pub outcome: JobOutcome,
    pub error: Option<String>,
}

/// When the warm-up stage removes the job's proxy from rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkBadPolicy {
    /// Mark bad when the warm-up request fails (transport error or non-2xx).
    #[default]
    OnFailure,
    /// Mark bad after every successful warm-up (single-use proxies).
    OnSuccess,
    Never,
}

impl MarkBadPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkBadPolicy::OnFailure => "on-failure",
            MarkBadPolicy::OnSuccess => "on-success",
            MarkBadPolicy::Never => "never",
        }
    }
}

impl fmt::Display for MarkBadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MarkBadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "on-failure" | "failure" => Ok(MarkBadPolicy::OnFailure),
            "on-success" | "success" => Ok(MarkBadPolicy::OnSuccess),
            "never" | "off" => Ok(MarkBadPolicy::Never),
            _ => Err(format!("Unknown mark-bad policy: {}", s)),
        }
    }
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of parallel stage-chain replicas sharing the job source.
    pub replicas: usize,
    /// Delay after a successful warm-up.
    pub warmup_jitter: JitterConfig,
    pub mark_bad: MarkBadPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            replicas: 7,
            warmup_jitter: JitterConfig::default(),
            mark_bad: MarkBadPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas.max(1);
        self
    }

    pub fn with_warmup_jitter(mut self, jitter: JitterConfig) -> Self {
        self.warmup_jitter = jitter;
        self
    }

    pub fn with_mark_bad(mut self, policy: MarkBadPolicy) -> Self {
        self.mark_bad = policy;
        self
    }
}

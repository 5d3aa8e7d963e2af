pub mod error;
pub mod jitter;
pub mod job;
pub mod models;
pub mod pipeline;
pub mod stages;
pub mod traits;
pub mod user_agent;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::AppError;
pub use jitter::JitterConfig;
pub use job::{Job, JobOutcome, JobSummary, MarkBadPolicy, PipelineConfig};
pub use models::{Identity, PersistOutcome, PropertyRecord, Proxy, SessionCookies};
pub use pipeline::{Pipeline, PipelineReport, PipelineReporter, TracingPipelineReporter};
pub use traits::{Extractor, PortalFetcher, PropertyStore, ProxyPool};
pub use user_agent::UserAgents;

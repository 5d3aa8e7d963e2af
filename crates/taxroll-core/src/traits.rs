use std::future::Future;

use crate::error::AppError;
use crate::models::{Identity, PersistOutcome, PropertyRecord, Proxy, SessionCookies};

/// Relational store holding collected property records.
pub trait PropertyStore: Send + Sync + Clone + 'static {
    /// Returns true if a property row with this identifier exists.
    fn exists(&self, property_id: i64) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Write the record and all of its sub-entities in one transaction.
    ///
    /// A uniqueness violation on the property row yields
    /// `Ok(PersistOutcome::Duplicate)`; any other failure rolls the whole
    /// transaction back and returns `AppError::PersistenceError`.
    fn persist(
        &self,
        record: &PropertyRecord,
    ) -> impl Future<Output = Result<PersistOutcome, AppError>> + Send;
}

/// Rotation state of outbound proxies.
///
/// Implementations must perform selection and the last-used/use-count
/// update as one atomic unit, so two concurrent callers never both read
/// the same proxy as least-recently-used before either stamps it.
pub trait ProxyPool: Send + Sync + Clone + 'static {
    /// Claim the not-bad proxy with the oldest `last_used` (ties: fewest uses).
    fn select_next(&self) -> impl Future<Output = Result<Proxy, AppError>> + Send;

    /// Remove a proxy from rotation until it is externally reset.
    fn mark_bad(&self, ip: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Network access to the appraisal portal.
pub trait PortalFetcher: Send + Sync + Clone + 'static {
    /// Prime a session on the portal landing page and return its cookies.
    fn warm_up(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<SessionCookies, AppError>> + Send;

    /// Fetch a property detail page, replaying the warm-up session.
    fn fetch_detail(
        &self,
        url: &str,
        identity: &Identity,
        cookies: &SessionCookies,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// Turns a raw detail page into a structured record.
///
/// Must be deterministic and free of side effects.
pub trait Extractor: Send + Sync + Clone + 'static {
    fn extract(&self, html: &[u8]) -> Result<PropertyRecord, AppError>;
}

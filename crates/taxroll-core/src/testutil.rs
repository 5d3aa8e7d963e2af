//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::error::AppError;
use crate::models::{
    Identity, Improvement, ImprovementDetail, Land, PersistOutcome, PropertyRecord, Proxy,
    RollValue, SessionCookies, TaxingJurisdiction,
};
use crate::traits::{Extractor, PortalFetcher, PropertyStore, ProxyPool};
use crate::util::property_id_from_url;

/// Cookie every mock warm-up hands out.
pub const MOCK_SESSION_COOKIE: &str = "ASP.NET_SessionId=mock-session";

/// A fully populated record for `property_id`.
pub fn make_test_record(property_id: i64) -> PropertyRecord {
    PropertyRecord {
        property_id,
        owner_id: format!("O{property_id}"),
        owner_name: "SMITH JOHN".into(),
        owner_mailing_address: "PO BOX 1, CANTON, TX 75103".into(),
        zoning: "R1".into(),
        neighborhood_cd: "N100".into(),
        neighborhood: "CANTON CITY".into(),
        address: "100 MAIN ST, CANTON, TX".into(),
        legal_description: "LOT 1 BLK 2".into(),
        geographic_id: format!("G-{property_id}"),
        exemptions: "HS".into(),
        ownership_percentage: Some(100.0),
        mapsco_map_id: "M-12".into(),
        roll_values: vec![
            RollValue {
                year: 2023,
                improvements: Some(120_000),
                land_market: Some(30_000),
                ag_valuation: Some(0),
                appraised: Some(150_000),
                homestead_cap: Some(0),
                assessed: Some(150_000),
            },
            RollValue {
                year: 2022,
                improvements: Some(110_000),
                land_market: Some(28_000),
                ag_valuation: Some(0),
                appraised: Some(138_000),
                homestead_cap: Some(0),
                assessed: Some(138_000),
            },
        ],
        jurisdictions: vec![TaxingJurisdiction {
            entity: "CAD".into(),
            description: "VAN ZANDT CAD".into(),
            tax_rate: Some(0.0),
            appraised_value: Some(150_000),
            taxable_value: Some(150_000),
            estimated_tax: Some(0.0),
        }],
        improvements: vec![Improvement {
            name: "Improvement #1".into(),
            description: "RESIDENTIAL".into(),
            state_code: "A1".into(),
            living_area: Some(1_850.0),
            value: Some(120_000),
            details: vec![ImprovementDetail {
                detail_type: "MA".into(),
                description: "MAIN AREA".into(),
                class: "R4".into(),
                exterior_wall: "BRICK".into(),
                year_built: Some(1998),
                square_feet: Some(1_850.0),
            }],
        }],
        land: vec![Land {
            number: Some(1),
            land_type: "F1".into(),
            description: "RES HOMESITE".into(),
            acres: Some(0.5),
            square_feet: Some(21_780.0),
            eff_front: Some(0.0),
            eff_depth: Some(0.0),
            market_value: Some(30_000),
        }],
    }
}

// ---------------------------------------------------------------------------
// MockProxyPool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PoolState {
    /// (proxy, logical clock of last selection; 0 = never used)
    proxies: Vec<(Proxy, u64)>,
    clock: u64,
    selections: usize,
    bad: Vec<String>,
}

/// In-memory LRU pool. Selection and stamping happen under one lock.
#[derive(Clone, Default)]
pub struct MockProxyPool {
    state: Arc<Mutex<PoolState>>,
}

impl MockProxyPool {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_proxies<I, S>(ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pool = Self::default();
        pool.state.lock().unwrap().proxies =
            ips.into_iter().map(|ip| (Proxy::new(ip), 0)).collect();
        pool
    }

    /// Total successful selections so far.
    pub fn selections(&self) -> usize {
        self.state.lock().unwrap().selections
    }

    /// IPs passed to `mark_bad`, in call order.
    pub fn bad_ips(&self) -> Vec<String> {
        self.state.lock().unwrap().bad.clone()
    }

    pub fn uses_of(&self, ip: &str) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .proxies
            .iter()
            .find(|(p, _)| p.ip == ip)
            .map(|(p, _)| p.uses)
    }
}

impl ProxyPool for MockProxyPool {
    async fn select_next(&self) -> Result<Proxy, AppError> {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        let clock = state.clock;

        let slot = state
            .proxies
            .iter_mut()
            .filter(|(p, _)| !p.is_bad)
            .min_by(|(a, a_used), (b, b_used)| {
                a_used
                    .cmp(b_used)
                    .then(a.uses.cmp(&b.uses))
                    .then(a.ip.cmp(&b.ip))
            })
            .ok_or(AppError::ProxyExhaustion)?;

        slot.1 = clock;
        slot.0.uses += 1;
        slot.0.last_used = Some(Utc::now());
        let proxy = slot.0.clone();
        state.selections += 1;
        Ok(proxy)
    }

    async fn mark_bad(&self, ip: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some((p, _)) = state.proxies.iter_mut().find(|(p, _)| p.ip == ip) {
            p.is_bad = true;
        }
        state.bad.push(ip.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    existing: HashSet<i64>,
    persisted: Vec<PropertyRecord>,
    exists_calls: usize,
    exists_error: Option<AppError>,
    persist_error: Option<AppError>,
    persist_race: bool,
}

/// Store keyed by property id. Persisting an id makes later `exists` calls
/// return true, and persisting it twice yields `Duplicate`.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_existing(ids: impl IntoIterator<Item = i64>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().existing = ids.into_iter().collect();
        store
    }

    /// Every `exists` call fails with `error`.
    pub fn with_exists_error(error: AppError) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().exists_error = Some(error);
        store
    }

    /// Every `persist` call fails with `error`.
    pub fn with_persist_error(error: AppError) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().persist_error = Some(error);
        store
    }

    /// Every `persist` call reports that another writer got there first.
    pub fn with_persist_race() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().persist_race = true;
        store
    }

    pub fn exists_calls(&self) -> usize {
        self.state.lock().unwrap().exists_calls
    }

    pub fn persisted_ids(&self) -> Vec<i64> {
        self.state
            .lock()
            .unwrap()
            .persisted
            .iter()
            .map(|r| r.property_id)
            .collect()
    }

    pub fn persisted(&self) -> Vec<PropertyRecord> {
        self.state.lock().unwrap().persisted.clone()
    }
}

impl PropertyStore for MockStore {
    async fn exists(&self, property_id: i64) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        state.exists_calls += 1;
        if let Some(e) = &state.exists_error {
            return Err(e.clone());
        }
        Ok(state.existing.contains(&property_id))
    }

    async fn persist(&self, record: &PropertyRecord) -> Result<PersistOutcome, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = &state.persist_error {
            return Err(e.clone());
        }
        if state.persist_race || !state.existing.insert(record.property_id) {
            return Ok(PersistOutcome::Duplicate);
        }
        state.persisted.push(record.clone());
        Ok(PersistOutcome::Inserted)
    }
}

// ---------------------------------------------------------------------------
// MockPortal
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PortalState {
    /// Errors returned by successive warm-ups; empty = succeed.
    warm_up_errors: Vec<AppError>,
    /// Property ids whose detail fetch fails with a network error.
    failing_details: HashSet<i64>,
    delay: Duration,
    warm_ups: Vec<Identity>,
    fetches: Vec<String>,
    detail_cookies: Vec<Vec<String>>,
}

/// Fake portal. Detail bodies are `property:{id}`, readable by
/// [`MockExtractor`].
#[derive(Clone, Default)]
pub struct MockPortal {
    state: Arc<Mutex<PortalState>>,
}

impl MockPortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next warm-up.
    pub fn with_warm_up_error(self, error: AppError) -> Self {
        self.state.lock().unwrap().warm_up_errors.push(error);
        self
    }

    pub fn with_failing_detail(self, property_id: i64) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_details
            .insert(property_id);
        self
    }

    /// Sleep this long inside every request.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().delay = delay;
        self
    }

    pub fn warm_up_calls(&self) -> Vec<Identity> {
        self.state.lock().unwrap().warm_ups.clone()
    }

    /// Detail URLs requested, in call order.
    pub fn fetch_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn detail_cookies(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().detail_cookies.clone()
    }

    fn delay(&self) -> Duration {
        self.state.lock().unwrap().delay
    }
}

impl PortalFetcher for MockPortal {
    async fn warm_up(&self, identity: &Identity) -> Result<SessionCookies, AppError> {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.warm_ups.push(identity.clone());
        if !state.warm_up_errors.is_empty() {
            return Err(state.warm_up_errors.remove(0));
        }
        Ok(SessionCookies(vec![MOCK_SESSION_COOKIE.to_string()]))
    }

    async fn fetch_detail(
        &self,
        url: &str,
        _identity: &Identity,
        cookies: &SessionCookies,
    ) -> Result<Vec<u8>, AppError> {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.fetches.push(url.to_string());
        state.detail_cookies.push(cookies.0.clone());

        let id = property_id_from_url(url)?;
        if state.failing_details.contains(&id) {
            return Err(AppError::NetworkError(format!("HTTP 502 for {url}")));
        }
        Ok(format!("property:{id}").into_bytes())
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Turns a `property:{id}` body into [`make_test_record`]`(id)`.
#[derive(Clone, Default)]
pub struct MockExtractor {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next extraction fails with `error`.
    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Extractor for MockExtractor {
    fn extract(&self, html: &[u8]) -> Result<PropertyRecord, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        let text = std::str::from_utf8(html)
            .map_err(|e| AppError::ParseError(format!("body is not UTF-8: {e}")))?;
        let id = text
            .strip_prefix("property:")
            .and_then(|rest| rest.trim().parse::<i64>().ok())
            .ok_or_else(|| AppError::ParseError(format!("unrecognised body '{text}'")))?;
        Ok(make_test_record(id))
    }
}

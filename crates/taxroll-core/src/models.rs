use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tax property as published by the appraisal portal.
///
/// Created once per successfully fetched and parsed job and persisted as a
/// single transactional unit. Never mutated after extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// External property identifier (the portal's `prop_id`).
    pub property_id: i64,
    pub owner_id: String,
    pub owner_name: String,
    pub owner_mailing_address: String,
    pub zoning: String,
    pub neighborhood_cd: String,
    pub neighborhood: String,
    /// Situs address.
    pub address: String,
    pub legal_description: String,
    pub geographic_id: String,
    pub exemptions: String,
    pub ownership_percentage: Option<f64>,
    pub mapsco_map_id: String,
    pub roll_values: Vec<RollValue>,
    pub jurisdictions: Vec<TaxingJurisdiction>,
    pub improvements: Vec<Improvement>,
    pub land: Vec<Land>,
}

/// One tax year's valuation snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollValue {
    pub year: i32,
    pub improvements: Option<i64>,
    pub land_market: Option<i64>,
    pub ag_valuation: Option<i64>,
    pub appraised: Option<i64>,
    pub homestead_cap: Option<i64>,
    pub assessed: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxingJurisdiction {
    pub entity: String,
    pub description: String,
    pub tax_rate: Option<f64>,
    pub appraised_value: Option<i64>,
    pub taxable_value: Option<i64>,
    pub estimated_tax: Option<f64>,
}

/// A building or other improvement on the property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub name: String,
    pub description: String,
    pub state_code: String,
    /// Living area in square feet.
    pub living_area: Option<f64>,
    pub value: Option<i64>,
    pub details: Vec<ImprovementDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImprovementDetail {
    pub detail_type: String,
    pub description: String,
    pub class: String,
    pub exterior_wall: String,
    pub year_built: Option<i32>,
    pub square_feet: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Land {
    pub number: Option<i32>,
    pub land_type: String,
    pub description: String,
    pub acres: Option<f64>,
    pub square_feet: Option<f64>,
    pub eff_front: Option<f64>,
    pub eff_depth: Option<f64>,
    pub market_value: Option<i64>,
}

/// An outbound forward proxy, addressed as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub ip: String,
    /// `None` until the proxy is selected for the first time.
    pub last_used: Option<DateTime<Utc>>,
    pub uses: i64,
    pub is_bad: bool,
}

impl Proxy {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            last_used: None,
            uses: 0,
            is_bad: false,
        }
    }

    /// Proxy URL in the form reqwest expects (`http://host:port`).
    pub fn url(&self) -> String {
        if self.ip.contains("://") {
            self.ip.clone()
        } else {
            format!("http://{}", self.ip)
        }
    }
}

/// The client identity a job presents to the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub proxy: Option<Proxy>,
    pub user_agent: String,
}

/// Cookies captured by the warm-up request, as `name=value` pairs.
///
/// Scoped to one job: the detail request of the same job replays them,
/// other jobs never see them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies(pub Vec<String>);

impl SessionCookies {
    /// Parse a `Cookie` header value (`a=1; b=2`).
    pub fn from_header(header: &str) -> Self {
        Self(
            header
                .split(';')
                .map(str::trim)
                .filter(|pair| !pair.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of a persistence attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// The property row already existed (a concurrent worker won the race).
    Duplicate,
}

use std::collections::HashSet;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use taxroll_core::error::AppError;
use taxroll_core::models::{
    Improvement, ImprovementDetail, Land, PropertyRecord, RollValue, TaxingJurisdiction,
};
use taxroll_core::traits::Extractor;

type Setter<T> = fn(&mut T, &str);

/// `#propertyDetails` label (lowercased, without the trailing colon) → field.
const PROPERTY_LABELS: &[(&str, Setter<PropertyRecord>)] = &[
    ("geographic id", |r, v| r.geographic_id = v.to_string()),
    ("zoning", |r, v| r.zoning = v.to_string()),
    ("address", |r, v| r.address = v.to_string()),
    ("mapsco", |r, v| r.mapsco_map_id = v.to_string()),
    ("neighborhood", |r, v| r.neighborhood = v.to_string()),
    ("neighborhood cd", |r, v| r.neighborhood_cd = v.to_string()),
    ("legal description", |r, v| r.legal_description = v.to_string()),
    ("name", |r, v| r.owner_name = v.to_string()),
    ("owner id", |r, v| r.owner_id = v.to_string()),
    ("mailing address", |r, v| r.owner_mailing_address = v.to_string()),
    ("% ownership", |r, v| r.ownership_percentage = parse_decimal(v)),
    ("exemptions", |r, v| r.exemptions = v.to_string()),
];

const PROPERTY_ID_LABEL: &str = "property id";

/// Column → field, by position. Year comes first and is handled separately.
const ROLL_COLUMNS: &[Setter<RollValue>] = &[
    |r, v| r.improvements = parse_money(v),
    |r, v| r.land_market = parse_money(v),
    |r, v| r.ag_valuation = parse_money(v),
    |r, v| r.appraised = parse_money(v),
    |r, v| r.homestead_cap = parse_money(v),
    |r, v| r.assessed = parse_money(v),
];

const JURISDICTION_COLUMNS: &[Setter<TaxingJurisdiction>] = &[
    |j, v| j.entity = v.to_string(),
    |j, v| j.description = v.to_string(),
    |j, v| j.tax_rate = parse_decimal(v),
    |j, v| j.appraised_value = parse_money(v),
    |j, v| j.taxable_value = parse_money(v),
    |j, v| j.estimated_tax = parse_decimal(v),
];

/// The improvement header row alternates labels and values.
const IMPROVEMENT_COLUMNS: &[Setter<Improvement>] = &[
    |i, v| i.name = v.trim_end_matches(':').trim().to_string(),
    |i, v| i.description = v.to_string(),
    |_, _| {},
    |i, v| i.state_code = v.to_string(),
    |_, _| {},
    |i, v| i.living_area = parse_decimal(v),
    |_, _| {},
    |i, v| i.value = parse_money(v),
];

/// First column of a detail row is an empty spacer.
const DETAIL_COLUMNS: &[Setter<ImprovementDetail>] = &[
    |_, _| {},
    |d, v| d.detail_type = v.to_string(),
    |d, v| d.description = v.to_string(),
    |d, v| d.class = v.to_string(),
    |d, v| d.exterior_wall = v.to_string(),
    |d, v| d.year_built = parse_int(v),
    |d, v| d.square_feet = parse_decimal(v),
];

const LAND_COLUMNS: &[Setter<Land>] = &[
    |l, v| l.number = parse_int(v),
    |l, v| l.land_type = v.to_string(),
    |l, v| l.description = v.to_string(),
    |l, v| l.acres = parse_decimal(v),
    |l, v| l.square_feet = parse_decimal(v),
    |l, v| l.eff_front = parse_decimal(v),
    |l, v| l.eff_depth = parse_decimal(v),
    |l, v| l.market_value = parse_money(v),
];

struct Selectors {
    property_rows: Selector,
    roll_rows: Selector,
    jurisdiction_rows: Selector,
    improvement_tables: Selector,
    land_rows: Selector,
    row: Selector,
    td: Selector,
    cell: Selector,
}

fn create_selector(sel: &str) -> Result<Selector, AppError> {
    Selector::parse(sel).map_err(|e| AppError::ConfigError(format!("invalid selector '{sel}': {e}")))
}

/// Detail-page extractor for the PropAccess portal, built on `scraper`.
///
/// Reads the property, roll history, taxing jurisdiction, improvement and
/// land sections. Only the property id is mandatory; every other cell is
/// optional and blank or unparsable numbers become `None`.
#[derive(Clone)]
pub struct HtmlRecordExtractor {
    selectors: Arc<Selectors>,
}

impl HtmlRecordExtractor {
    pub fn new() -> Result<Self, AppError> {
        let selectors = Selectors {
            property_rows: create_selector("#propertyDetails tr")?,
            roll_rows: create_selector("#rollHistoryDetails tr")?,
            jurisdiction_rows: create_selector("#taxingJurisdictionDetails > table.tableData tr")?,
            improvement_tables: create_selector("#improvementBuildingDetails table")?,
            land_rows: create_selector("#landDetails > table tr")?,
            row: create_selector("tr")?,
            td: create_selector("td")?,
            cell: create_selector("th, td")?,
        };
        Ok(Self {
            selectors: Arc::new(selectors),
        })
    }

    fn texts(&self, row: ElementRef<'_>, cells: &Selector) -> Vec<String> {
        row.select(cells).map(cell_text).collect()
    }

    fn property(&self, doc: &Html) -> Result<PropertyRecord, AppError> {
        let mut record = PropertyRecord::default();
        let mut property_id = None;

        for row in doc.select(&self.selectors.property_rows) {
            let cells = self.texts(row, &self.selectors.td);
            for pair in cells.chunks_exact(2) {
                let label = normalize_label(&pair[0]);
                let value = pair[1].as_str();
                if label == PROPERTY_ID_LABEL {
                    property_id = value.parse::<i64>().ok();
                } else if let Some((_, set)) = PROPERTY_LABELS.iter().find(|(l, _)| *l == label) {
                    set(&mut record, value);
                }
            }
        }

        record.property_id = property_id
            .ok_or_else(|| AppError::ParseError("page has no numeric property id".into()))?;
        Ok(record)
    }

    /// One entry per roll year; a repeated year keeps the first (newest) row.
    fn roll_values(&self, doc: &Html) -> Vec<RollValue> {
        let mut seen = HashSet::new();
        doc.select(&self.selectors.roll_rows)
            .filter_map(|row| {
                let cells = self.texts(row, &self.selectors.td);
                let (year, rest) = cells.split_first()?;
                let mut value = RollValue {
                    year: parse_int(year)?,
                    ..RollValue::default()
                };
                apply_columns(ROLL_COLUMNS, &mut value, rest);
                Some(value)
            })
            .filter(|value| seen.insert(value.year))
            .collect()
    }

    fn jurisdictions(&self, doc: &Html) -> Vec<TaxingJurisdiction> {
        doc.select(&self.selectors.jurisdiction_rows)
            .map(|row| {
                let mut jurisdiction = TaxingJurisdiction::default();
                apply_columns(
                    JURISDICTION_COLUMNS,
                    &mut jurisdiction,
                    &self.texts(row, &self.selectors.td),
                );
                jurisdiction
            })
            // Header rows have no <td>; the totals row has no entity.
            .filter(|j| !j.entity.is_empty())
            .collect()
    }

    fn improvements(&self, doc: &Html) -> Vec<Improvement> {
        let mut improvements: Vec<Improvement> = Vec::new();

        for table in doc.select(&self.selectors.improvement_tables) {
            let class = |name: &str| table.value().classes().any(|c| c == name);

            if class("improvements") {
                let Some(row) = table.select(&self.selectors.row).next() else {
                    continue;
                };
                let mut improvement = Improvement::default();
                apply_columns(
                    IMPROVEMENT_COLUMNS,
                    &mut improvement,
                    &self.texts(row, &self.selectors.cell),
                );
                if !improvement.name.is_empty() {
                    improvements.push(improvement);
                }
            } else if class("improvementDetails") {
                let Some(owner) = improvements.last_mut() else {
                    tracing::debug!("Improvement details without a preceding improvement");
                    continue;
                };
                for row in table.select(&self.selectors.row).skip(1) {
                    let mut detail = ImprovementDetail::default();
                    apply_columns(
                        DETAIL_COLUMNS,
                        &mut detail,
                        &self.texts(row, &self.selectors.cell),
                    );
                    if !detail.description.is_empty() {
                        owner.details.push(detail);
                    }
                }
            }
        }

        improvements
    }

    fn land(&self, doc: &Html) -> Vec<Land> {
        doc.select(&self.selectors.land_rows)
            .filter_map(|row| {
                let cells = self.texts(row, &self.selectors.td);
                if cells.first().is_none_or(|n| n.is_empty()) {
                    return None;
                }
                let mut land = Land::default();
                apply_columns(LAND_COLUMNS, &mut land, &cells);
                Some(land)
            })
            .collect()
    }
}

impl Extractor for HtmlRecordExtractor {
    fn extract(&self, html: &[u8]) -> Result<PropertyRecord, AppError> {
        let text = String::from_utf8_lossy(html);
        let doc = Html::parse_document(&text);

        let mut record = self.property(&doc)?;
        record.roll_values = self.roll_values(&doc);
        record.jurisdictions = self.jurisdictions(&doc);
        record.improvements = self.improvements(&doc);
        record.land = self.land(&doc);

        tracing::debug!(
            property_id = record.property_id,
            roll_values = record.roll_values.len(),
            jurisdictions = record.jurisdictions.len(),
            improvements = record.improvements.len(),
            land = record.land.len(),
            "Extracted property record"
        );
        Ok(record)
    }
}

fn apply_columns<T>(columns: &[Setter<T>], target: &mut T, cells: &[String]) {
    for (set, text) in columns.iter().zip(cells) {
        set(target, text);
    }
}

/// Element text with runs of whitespace (including `<br>` breaks) collapsed.
fn cell_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_label(raw: &str) -> String {
    raw.trim().trim_end_matches(':').trim().to_lowercase()
}

/// Leading numeric part of a portal cell: `"$1,234.50"` → `"1234.50"`,
/// `"1,850.0 sqft"` → `"1850.0"`, `"N/A"` → `None`.
fn numeric_part(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ','))
        .skip_while(|c| c.is_whitespace())
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
        .collect();
    if digits.chars().any(|c| c.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

pub fn parse_decimal(raw: &str) -> Option<f64> {
    numeric_part(raw)?.parse().ok()
}

/// Currency cell as whole dollars.
pub fn parse_money(raw: &str) -> Option<i64> {
    parse_decimal(raw).map(|v| v.round() as i64)
}

pub fn parse_int(raw: &str) -> Option<i32> {
    let value = parse_decimal(raw)?;
    if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}

use std::collections::HashMap;

use sqlx::{PgPool, Postgres, Transaction};
use taxroll_core::error::AppError;
use taxroll_core::models::{
    Improvement, ImprovementDetail, Land, PersistOutcome, PropertyRecord, RollValue,
    TaxingJurisdiction,
};

fn db_err(e: sqlx::Error) -> AppError {
    AppError::PersistenceError(e.to_string())
}

/// Repository for property records in PostgreSQL.
#[derive(Clone)]
pub struct PropertyRepository {
    pool: PgPool,
}

impl PropertyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns true if a property row with this identifier exists.
    pub async fn exists(&self, property_id: i64) -> Result<bool, AppError> {
        let row: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM properties WHERE id = $1)")
            .bind(property_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0)
    }

    /// Write the record and all of its children in one transaction.
    ///
    /// If the property row already exists the transaction is rolled back
    /// and `PersistOutcome::Duplicate` is returned. Any other failure rolls
    /// back every statement of the record.
    pub async fn persist(&self, record: &PropertyRecord) -> Result<PersistOutcome, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if !insert_property(&mut tx, record).await? {
            tx.rollback().await.map_err(db_err)?;
            return Ok(PersistOutcome::Duplicate);
        }
        insert_roll_values(&mut tx, record).await?;
        insert_jurisdictions(&mut tx, record).await?;
        insert_improvements(&mut tx, record).await?;
        insert_land(&mut tx, record).await?;

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(property_id = record.property_id, "Property committed");
        Ok(PersistOutcome::Inserted)
    }

    /// Load a stored property with all of its children.
    pub async fn get(&self, property_id: i64) -> Result<Option<PropertyRecord>, AppError> {
        let Some(row) = sqlx::query_as::<_, PropertyRow>(
            r#"
            SELECT id, owner_id, owner_name, owner_mailing_address, zoning, neighborhood_cd,
                   neighborhood, address, legal_description, geographic_id, exemptions,
                   ownership_percentage, mapsco_map_id
            FROM properties
            WHERE id = $1
            "#,
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        else {
            return Ok(None);
        };

        let mut record = PropertyRecord::from(row);

        record.roll_values = sqlx::query_as::<_, RollValueRow>(
            r#"
            SELECT year, improvements, land_market, ag_valuation, appraised, homestead_cap, assessed
            FROM roll_values
            WHERE property_id = $1
            ORDER BY year DESC
            "#,
        )
        .bind(property_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(Into::into)
        .collect();

        record.jurisdictions = sqlx::query_as::<_, JurisdictionRow>(
            r#"
            SELECT entity, description, tax_rate, appraised_value, taxable_value, estimated_tax
            FROM jurisdictions
            WHERE property_id = $1
            ORDER BY id
            "#,
        )
        .bind(property_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(Into::into)
        .collect();

        let mut details: HashMap<i64, Vec<ImprovementDetail>> = HashMap::new();
        for row in sqlx::query_as::<_, DetailRow>(
            r#"
            SELECT d.improvement_id, d.detail_type, d.description, d.class, d.exterior_wall,
                   d.year_built, d.square_feet
            FROM improvement_details d
            JOIN improvements i ON i.id = d.improvement_id
            WHERE i.property_id = $1
            ORDER BY d.id
            "#,
        )
        .bind(property_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        {
            details
                .entry(row.improvement_id)
                .or_default()
                .push(row.into());
        }

        record.improvements = sqlx::query_as::<_, ImprovementRow>(
            r#"
            SELECT id, name, description, state_code, living_area, value
            FROM improvements
            WHERE property_id = $1
            ORDER BY id
            "#,
        )
        .bind(property_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(|row| {
            let own = details.remove(&row.id).unwrap_or_default();
            let mut improvement = Improvement::from(row);
            improvement.details = own;
            improvement
        })
        .collect();

        record.land = sqlx::query_as::<_, LandRow>(
            r#"
            SELECT number, land_type, description, acres, square_feet, eff_front, eff_depth,
                   market_value
            FROM land
            WHERE property_id = $1
            ORDER BY id
            "#,
        )
        .bind(property_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(Into::into)
        .collect();

        Ok(Some(record))
    }

    /// Number of stored properties.
    pub async fn count(&self) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM properties")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0)
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// -- Transaction steps --

/// Returns false if the property row already existed.
async fn insert_property(
    tx: &mut Transaction<'_, Postgres>,
    record: &PropertyRecord,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO properties (id, owner_id, owner_name, owner_mailing_address, zoning,
                                neighborhood_cd, neighborhood, address, legal_description,
                                geographic_id, exemptions, ownership_percentage, mapsco_map_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(record.property_id)
    .bind(&record.owner_id)
    .bind(&record.owner_name)
    .bind(&record.owner_mailing_address)
    .bind(&record.zoning)
    .bind(&record.neighborhood_cd)
    .bind(&record.neighborhood)
    .bind(&record.address)
    .bind(&record.legal_description)
    .bind(&record.geographic_id)
    .bind(&record.exemptions)
    .bind(record.ownership_percentage)
    .bind(&record.mapsco_map_id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    Ok(result.rows_affected() == 1)
}

async fn insert_roll_values(
    tx: &mut Transaction<'_, Postgres>,
    record: &PropertyRecord,
) -> Result<(), AppError> {
    for roll in &record.roll_values {
        sqlx::query(
            r#"
            INSERT INTO roll_values (property_id, year, improvements, land_market, ag_valuation,
                                     appraised, homestead_cap, assessed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.property_id)
        .bind(roll.year)
        .bind(roll.improvements)
        .bind(roll.land_market)
        .bind(roll.ag_valuation)
        .bind(roll.appraised)
        .bind(roll.homestead_cap)
        .bind(roll.assessed)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

async fn insert_jurisdictions(
    tx: &mut Transaction<'_, Postgres>,
    record: &PropertyRecord,
) -> Result<(), AppError> {
    for j in &record.jurisdictions {
        sqlx::query(
            r#"
            INSERT INTO jurisdictions (property_id, entity, description, tax_rate,
                                       appraised_value, taxable_value, estimated_tax)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.property_id)
        .bind(&j.entity)
        .bind(&j.description)
        .bind(j.tax_rate)
        .bind(j.appraised_value)
        .bind(j.taxable_value)
        .bind(j.estimated_tax)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

async fn insert_improvements(
    tx: &mut Transaction<'_, Postgres>,
    record: &PropertyRecord,
) -> Result<(), AppError> {
    for improvement in &record.improvements {
        let (improvement_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO improvements (property_id, name, description, state_code, living_area,
                                      value)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(record.property_id)
        .bind(&improvement.name)
        .bind(&improvement.description)
        .bind(&improvement.state_code)
        .bind(improvement.living_area)
        .bind(improvement.value)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_err)?;

        for detail in &improvement.details {
            sqlx::query(
                r#"
                INSERT INTO improvement_details (improvement_id, detail_type, description, class,
                                                 exterior_wall, year_built, square_feet)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(improvement_id)
            .bind(&detail.detail_type)
            .bind(&detail.description)
            .bind(&detail.class)
            .bind(&detail.exterior_wall)
            .bind(detail.year_built)
            .bind(detail.square_feet)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }
    }
    Ok(())
}

async fn insert_land(
    tx: &mut Transaction<'_, Postgres>,
    record: &PropertyRecord,
) -> Result<(), AppError> {
    for land in &record.land {
        sqlx::query(
            r#"
            INSERT INTO land (property_id, number, land_type, description, acres, square_feet,
                              eff_front, eff_depth, market_value)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.property_id)
        .bind(land.number)
        .bind(&land.land_type)
        .bind(&land.description)
        .bind(land.acres)
        .bind(land.square_feet)
        .bind(land.eff_front)
        .bind(land.eff_depth)
        .bind(land.market_value)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct PropertyRow {
    id: i64,
    owner_id: String,
    owner_name: String,
    owner_mailing_address: String,
    zoning: String,
    neighborhood_cd: String,
    neighborhood: String,
    address: String,
    legal_description: String,
    geographic_id: String,
    exemptions: String,
    ownership_percentage: Option<f64>,
    mapsco_map_id: String,
}

impl From<PropertyRow> for PropertyRecord {
    fn from(row: PropertyRow) -> Self {
        PropertyRecord {
            property_id: row.id,
            owner_id: row.owner_id,
            owner_name: row.owner_name,
            owner_mailing_address: row.owner_mailing_address,
            zoning: row.zoning,
            neighborhood_cd: row.neighborhood_cd,
            neighborhood: row.neighborhood,
            address: row.address,
            legal_description: row.legal_description,
            geographic_id: row.geographic_id,
            exemptions: row.exemptions,
            ownership_percentage: row.ownership_percentage,
            mapsco_map_id: row.mapsco_map_id,
            ..PropertyRecord::default()
        }
    }
}

#[derive(sqlx::FromRow)]
struct RollValueRow {
    year: i32,
    improvements: Option<i64>,
    land_market: Option<i64>,
    ag_valuation: Option<i64>,
    appraised: Option<i64>,
    homestead_cap: Option<i64>,
    assessed: Option<i64>,
}

impl From<RollValueRow> for RollValue {
    fn from(row: RollValueRow) -> Self {
        RollValue {
            year: row.year,
            improvements: row.improvements,
            land_market: row.land_market,
            ag_valuation: row.ag_valuation,
            appraised: row.appraised,
            homestead_cap: row.homestead_cap,
            assessed: row.assessed,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JurisdictionRow {
    entity: String,
    description: String,
    tax_rate: Option<f64>,
    appraised_value: Option<i64>,
    taxable_value: Option<i64>,
    estimated_tax: Option<f64>,
}

impl From<JurisdictionRow> for TaxingJurisdiction {
    fn from(row: JurisdictionRow) -> Self {
        TaxingJurisdiction {
            entity: row.entity,
            description: row.description,
            tax_rate: row.tax_rate,
            appraised_value: row.appraised_value,
            taxable_value: row.taxable_value,
            estimated_tax: row.estimated_tax,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ImprovementRow {
    id: i64,
    name: String,
    description: String,
    state_code: String,
    living_area: Option<f64>,
    value: Option<i64>,
}

impl From<ImprovementRow> for Improvement {
    fn from(row: ImprovementRow) -> Self {
        Improvement {
            name: row.name,
            description: row.description,
            state_code: row.state_code,
            living_area: row.living_area,
            value: row.value,
            details: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct DetailRow {
    improvement_id: i64,
    detail_type: String,
    description: String,
    class: String,
    exterior_wall: String,
    year_built: Option<i32>,
    square_feet: Option<f64>,
}

impl From<DetailRow> for ImprovementDetail {
    fn from(row: DetailRow) -> Self {
        ImprovementDetail {
            detail_type: row.detail_type,
            description: row.description,
            class: row.class,
            exterior_wall: row.exterior_wall,
            year_built: row.year_built,
            square_feet: row.square_feet,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LandRow {
    number: Option<i32>,
    land_type: String,
    description: String,
    acres: Option<f64>,
    square_feet: Option<f64>,
    eff_front: Option<f64>,
    eff_depth: Option<f64>,
    market_value: Option<i64>,
}

impl From<LandRow> for Land {
    fn from(row: LandRow) -> Self {
        Land {
            number: row.number,
            land_type: row.land_type,
            description: row.description,
            acres: row.acres,
            square_feet: row.square_feet,
            eff_front: row.eff_front,
            eff_depth: row.eff_depth,
            market_value: row.market_value,
        }
    }
}

// -- Trait implementation --

impl taxroll_core::traits::PropertyStore for PropertyRepository {
    async fn exists(&self, property_id: i64) -> Result<bool, AppError> {
        self.exists(property_id).await
    }

    async fn persist(&self, record: &PropertyRecord) -> Result<PersistOutcome, AppError> {
        self.persist(record).await
    }
}

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use taxroll_core::error::AppError;
use taxroll_core::models::Proxy;

/// Advisory lock key serializing proxy claims across connections and processes.
const PROXY_CLAIM_LOCK: i64 = 0x7461_7872_6f6c_6c01;

fn db_err(e: sqlx::Error) -> AppError {
    AppError::PersistenceError(e.to_string())
}

/// Proxy rotation state in PostgreSQL.
///
/// Every claim runs in its own transaction holding a transaction-scoped
/// advisory lock, so reading the least-recently-used proxy and stamping it
/// is one serialized step across processes. A claimer waits for the lock
/// instead of skipping rows, so `ProxyExhaustion` means no usable proxy
/// exists.
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim the usable proxy with the oldest `last_used` (never-used first,
    /// ties broken by fewest uses) and stamp it.
    pub async fn select_next(&self) -> Result<Proxy, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(PROXY_CLAIM_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let claimed = sqlx::query_as::<_, ProxyRow>(
            r#"
            UPDATE proxies
            SET last_used = clock_timestamp(), uses = uses + 1
            WHERE ip = (
                SELECT ip FROM proxies
                WHERE NOT is_bad
                ORDER BY last_used ASC NULLS FIRST, uses ASC, ip ASC
                LIMIT 1
            )
            RETURNING ip, last_used, uses, is_bad
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        match claimed {
            Some(row) => Ok(row.into()),
            None => {
                tracing::debug!("No usable proxy left in the pool");
                Err(AppError::ProxyExhaustion)
            }
        }
    }

    /// Remove a proxy from rotation until [`reset_bad`](Self::reset_bad).
    pub async fn mark_bad(&self, ip: &str) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE proxies SET is_bad = TRUE WHERE ip = $1")
            .bind(ip)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            tracing::debug!(%ip, "mark_bad for unknown proxy");
        }
        Ok(())
    }

    /// Insert proxies that are not yet known. Returns how many were added.
    pub async fn load(&self, ips: &[String]) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO proxies (ip)
            SELECT UNNEST($1::varchar[])
            ON CONFLICT (ip) DO NOTHING
            "#,
        )
        .bind(ips)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// Put every bad proxy back into rotation. Returns how many were reset.
    pub async fn reset_bad(&self) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE proxies SET is_bad = FALSE WHERE is_bad")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// All proxies, ordered by address.
    pub async fn list(&self) -> Result<Vec<Proxy>, AppError> {
        let rows = sqlx::query_as::<_, ProxyRow>(
            "SELECT ip, last_used, uses, is_bad FROM proxies ORDER BY ip",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct ProxyRow {
    ip: String,
    last_used: Option<DateTime<Utc>>,
    uses: i64,
    is_bad: bool,
}

impl From<ProxyRow> for Proxy {
    fn from(row: ProxyRow) -> Self {
        Proxy {
            ip: row.ip,
            last_used: row.last_used,
            uses: row.uses,
            is_bad: row.is_bad,
        }
    }
}

impl taxroll_core::traits::ProxyPool for ProxyRepository {
    async fn select_next(&self) -> Result<Proxy, AppError> {
        self.select_next().await
    }

    async fn mark_bad(&self, ip: &str) -> Result<(), AppError> {
        self.mark_bad(ip).await
    }
}

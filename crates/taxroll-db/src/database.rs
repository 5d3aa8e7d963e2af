use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use taxroll_core::AppError;

use crate::config::DatabaseConfig;
use crate::property_repository::PropertyRepository;
use crate::proxy_repository::ProxyRepository;

/// Database facade: owns the connection pool, applies migrations
/// and hands out repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::PersistenceError(format!("Failed to connect: {e}")))?;

        tracing::debug!(max_connections = config.max_connections, "Database pool ready");
        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::PersistenceError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`PropertyRepository`] backed by this pool.
    pub fn property_repo(&self) -> PropertyRepository {
        PropertyRepository::new(self.pool.clone())
    }

    /// Get a [`ProxyRepository`] backed by this pool.
    pub fn proxy_repo(&self) -> ProxyRepository {
        ProxyRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

//! Database connection and management module
//!
//! Connection pooling and configuration for the Postgres-backed entity store
//! and attribution rebinder.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{info, warn};

pub mod attribution;
pub mod node_store;

pub use attribution::PgAttributionRebinder;
pub use node_store::PgEntityStore;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/ministry".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
        }
    }
}

/// Database connection manager
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// Create a new database manager with the given configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self, sqlx::Error> {
        info!(
            "Connecting to database: {}",
            mask_database_url(&config.database_url)
        );

        let mut pool_options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout);

        if let Some(idle_timeout) = config.idle_timeout {
            pool_options = pool_options.idle_timeout(idle_timeout);
        }

        if let Some(max_lifetime) = config.max_lifetime {
            pool_options = pool_options.max_lifetime(max_lifetime);
        }

        let pool = pool_options
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                e
            })?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create a new database manager with default configuration
    pub async fn with_default_config() -> Result<Self, sqlx::Error> {
        Self::new(DatabaseConfig::default()).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn entity_store(&self) -> PgEntityStore {
        PgEntityStore::new(self.pool.clone())
    }

    pub fn attribution_rebinder(&self) -> PgAttributionRebinder {
        PgAttributionRebinder::new(self.pool.clone())
    }

    /// Create every table and index both adapters need
    pub async fn initialize_schema(&self) -> anyhow::Result<()> {
        self.entity_store().initialize_schema().await?;
        self.attribution_rebinder().initialize_schema().await?;
        Ok(())
    }

    /// Test database connectivity
    pub async fn test_connection(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

/// Mask sensitive information in database URL for logging
fn mask_database_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.password().is_some() => {
            let mut masked = parsed.clone();
            let _ = masked.set_password(Some("***"));
            masked.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable database url>".to_string(),
    }
}

/// Map a sqlx failure onto the store taxonomy.
///
/// Serialization failures and deadlocks abort the unit; unique violations
/// that slip past the explicit pre-check abort too, since the offending row
/// is no longer readable in a failed transaction.
pub(crate) fn store_error(e: sqlx::Error) -> crate::error::StoreError {
    use crate::error::StoreError;

    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some("40001") | Some("40P01") => {
                return StoreError::Aborted(format!("concurrent update: {}", db.message()))
            }
            Some("23505") => {
                return StoreError::Aborted(format!("uniqueness violated: {}", db.message()))
            }
            _ => {}
        }
    }
    StoreError::Backend(anyhow::Error::new(e))
}

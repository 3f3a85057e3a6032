//! Database connection pool management.

use async_trait::async_trait;
use conductor_config::DatabaseConfig;
use conductor_core::{ConductorError, ConductorResult, Interface};
use shaku::Component;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::sync::Arc;
use tracing::{info, warn};

/// Interface for database pool operations.
#[async_trait]
pub trait DatabasePoolInterface: Interface + Send + Sync {
    /// Returns a reference to the underlying MySQL pool.
    fn inner(&self) -> &MySqlPool;

    /// Runs database migrations.
    async fn run_migrations(&self) -> ConductorResult<()>;

    /// Closes the database pool.
    async fn close(&self);
}

/// Database pool wrapper.
#[derive(Component)]
#[shaku(interface = DatabasePoolInterface)]
pub struct DatabasePool {
    pool: MySqlPool,
}

impl DatabasePool {
    /// Creates a new database pool from configuration.
    pub async fn new(config: &DatabaseConfig) -> ConductorResult<Self> {
        info!("Connecting to MySQL database...");

        let pool = MySqlPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                ConductorError::Database(format!("Failed to connect: {e}"))
            })?;

        info!("MySQL connection pool established");
        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePoolInterface for DatabasePool {
    fn inner(&self) -> &MySqlPool {
        &self.pool
    }

    async fn run_migrations(&self) -> ConductorResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ConductorError::Database(format!("Migration failed: {e}")))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .finish()
    }
}

/// Creates a shared database pool.
pub async fn create_pool(config: &DatabaseConfig) -> ConductorResult<Arc<DatabasePool>> {
    let pool = DatabasePool::new(config).await?;
    Ok(Arc::new(pool))
}

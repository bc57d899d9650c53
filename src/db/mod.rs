use crate::config::{DatabaseConfig, SecurityConfig};
use crate::error::Error;
use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub mod migrations;
pub mod models;
pub mod repositories;

/// Current time as stored in the database.
///
/// Timestamps are kept at whole-second precision so their text form sorts
/// chronologically inside SQLite comparisons.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Truncate an arbitrary instant to the stored precision
pub fn stored(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(0)
}

/// Database service for handling connections and migrations
pub struct DatabaseService {
    pub pool: Arc<SqlitePool>,
    config: DatabaseConfig,
    security: SecurityConfig,
}

impl DatabaseService {
    /// Create a new database service
    pub async fn new(config: &DatabaseConfig, security: &SecurityConfig) -> Result<Self> {
        info!("Initializing Database service");

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| Error::Config(format!("Invalid database URL: {}", e)))?
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?;

        info!("Connected to SQLite database at {}", config.url);

        let service = Self {
            pool: Arc::new(pool),
            config: config.clone(),
            security: security.clone(),
        };

        if config.auto_migrate {
            service.run_migrations().await?;
        }

        Ok(service)
    }

    /// Run database migrations and make sure an admin exists
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to run migrations: {}", e)))?;

        migrations::create_default_admin(&self.pool, &self.config, &self.security).await?;

        info!("Database migrations completed successfully");

        Ok(())
    }
}

/// Probe the pool with a trivial query
pub async fn health_check(pool: &SqlitePool) -> Result<bool> {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => Ok(true),
        Err(e) => {
            error!("Database health check failed: {}", e);
            Ok(false)
        }
    }
}

/// Single-connection in-memory pool with the schema applied, for tests
#[cfg(test)]
pub async fn test_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrations::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

/// File-backed WAL pool with several connections, for tests that need real concurrency
#[cfg(test)]
pub async fn shared_test_pool(max_connections: u32) -> Arc<SqlitePool> {
    let path = std::env::temp_dir().join(format!("vpn-admin-test-{}.db", uuid::Uuid::new_v4()));
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .unwrap();
    migrations::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

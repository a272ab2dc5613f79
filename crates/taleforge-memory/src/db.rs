//! `SQLite` connection pool and configuration.
//!
//! Durability for the memory store. Uses [`sqlx`] with runtime query
//! construction so no database is needed at build time.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::MemoryError;

/// Default maximum number of connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Configuration for the `SQLite` connection pool.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `SQLite` URL, e.g. `sqlite://story.db` or `sqlite::memory:`.
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl DbConfig {
    /// Create a new configuration from a database URL.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Configuration for a private in-memory database (tests, dry runs).
    ///
    /// Every `SQLite` memory connection is its own database, so the pool is
    /// pinned to one connection that never expires.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_owned(),
            max_connections: 1,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    fn is_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

/// Connection pool handle to the story database.
#[derive(Debug, Clone)]
pub struct MemoryDb {
    pool: SqlitePool,
}

impl MemoryDb {
    /// Connect using the provided configuration, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Config`] if the URL cannot be parsed, or
    /// [`MemoryError::Sqlite`] if the connection fails.
    pub async fn connect(config: &DbConfig) -> Result<Self, MemoryError> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| MemoryError::Config(format!("invalid database URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);
        if !config.is_memory() {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout);
        if config.is_memory() {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        tracing::info!(
            url = %config.url,
            max_connections = config.max_connections,
            "connected to SQLite"
        );

        Ok(Self { pool })
    }

    /// Connect to a URL with default pool settings and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError`] if the connection or a migration fails.
    pub async fn open(url: &str) -> Result<Self, MemoryError> {
        let config = if url.contains(":memory:") {
            DbConfig::in_memory()
        } else {
            DbConfig::new(url)
        };
        let db = Self::connect(&config).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations from the `migrations/` directory.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("story database migrations completed");
        Ok(())
    }

    /// Return a reference to the underlying [`SqlitePool`].
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("SQLite pool closed");
    }
}

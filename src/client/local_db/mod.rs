//! # Local Database Module
//!
//! Embedded SQLite store implementing the backend contract. Rows are keyed
//! by auto-assigned integer ids, the schema is versioned through a
//! `schema_migrations` table, and filtered fields carry expression indexes.
//!
//! ## Key Components
//!
//! - `LocalDatabase`: connection pool, pragmas and migrations
//! - `schema.rs`: table and index definitions per entity family
//! - `entities.rs`: CRUD and bulk operations behind [`crate::client::backend::Backend`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mealsync::client::backend::Backend;
//! use mealsync::client::local_db::LocalDatabase;
//! use mealsync::shared::entity::EntityFamily;
//!
//! # async fn demo() -> mealsync::shared::error::Result<()> {
//! let db = LocalDatabase::in_memory().await?;
//! let recipes = db.get_all(EntityFamily::Recipes).await?;
//! let stats = db.get_stats().await?;
//! # Ok(())
//! # }
//! ```

pub mod entities;
pub mod schema;

use crate::client::config::default_db_path;
use crate::shared::entity::EntityFamily;
use crate::shared::error::{DataError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;

/// Local database connection manager
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the database at the platform default location
    pub async fn new() -> Result<Self> {
        Self::open(&default_db_path()).await
    }

    /// Open or create a database file
    ///
    /// Uses WAL mode for better concurrency.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DataError::Storage(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA cache_size=1000").execute(&pool).await?;
        sqlx::query("PRAGMA temp_store=MEMORY").execute(&pool).await?;

        let db = Self { pool };
        db.init_schema().await?;
        tracing::info!("[LocalDb] Opened {}", path.display());
        Ok(db)
    }

    /// Private in-memory database
    ///
    /// A single connection keeps every query on the same memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        self.run_migrations().await
    }

    /// Apply every migration newer than the stored version
    async fn run_migrations(&self) -> Result<()> {
        let current = self.schema_version().await?;
        if !schema::needs_migration(current) {
            return Ok(());
        }

        for version in schema::get_pending_migrations(current) {
            let mut tx = self.pool.begin().await?;
            for statement in schema::migration_statements(version) {
                sqlx::query(&statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!("[LocalDb] Applied migration {}", version);
        }
        Ok(())
    }

    /// Highest applied migration, 0 for a fresh database
    pub async fn schema_version(&self) -> Result<i32> {
        let version: (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;
        Ok(version.0)
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Row counts per family
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let mut counts = HashMap::new();
        for family in EntityFamily::ALL {
            let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", family.collection()))
                .fetch_one(&self.pool)
                .await?;
            counts.insert(family, count.0 as u64);
        }
        Ok(DatabaseStats {
            counts,
            schema_version: self.schema_version().await?,
        })
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Stored rows per family
    pub counts: HashMap<EntityFamily, u64>,
    pub schema_version: i32,
}

impl DatabaseStats {
    pub fn count(&self, family: EntityFamily) -> u64 {
        self.counts.get(&family).copied().unwrap_or_default()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

//! SQLite-backed store for file records and settings.
//!
//! One [`Store`] is opened at startup and cloned into every component that
//! needs it; clones share the same connection pool. Every statement runs in
//! autocommit mode except [`Store::replace_path`], which holds a short
//! transaction around a key rewrite.
//!
//! # Example
//!
//! ```ignore
//! use vidshrink::store::Store;
//! use vidshrink::config::DatabaseConfig;
//!
//! let store = Store::open(&DatabaseConfig::in_memory()).await?;
//! store.upsert(&record).await?;
//! let pending = store.list_by(false, false).await?;
//! ```

use crate::config::DatabaseConfig;
use crate::record::FileRecord;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Connections in the pool for file-backed databases.
const MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_FILES: &str = "SELECT id, name, path, initial_size, current_size, deleted, converted, processed FROM files";

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Aggregate savings over all rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: i64,
    pub total_bytes_saved: i64,
    pub percent_saved: f64,
}

/// A key/value setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// Savings percentage, `0.0` when nothing has been tracked yet.
pub fn percent_of(saved: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    saved as f64 / total as f64 * 100.0
}

/// Shared handle to the record database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the configured database and apply migrations.
    ///
    /// `:memory:` opens a private in-memory database held by a single
    /// connection that is never recycled, so its contents live as long as
    /// the store.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = if config.is_in_memory() {
            let options = "sqlite::memory:".parse::<SqliteConnectOptions>()?;
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
                .busy_timeout(BUSY_TIMEOUT);
            SqlitePoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Opened database: {}", config.path);

        Ok(Self { pool })
    }

    /// Shorthand for an ephemeral store.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(&DatabaseConfig::in_memory()).await
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database connections");
    }

    /// Insert the record, or fully overwrite the row with the same id.
    pub async fn upsert(&self, record: &FileRecord) -> Result<(), StoreError> {
        upsert_with(&self.pool, record).await?;
        debug!("Saved file record: {}", record.path);
        Ok(())
    }

    /// Insert the record unless a row with its id (or path) already exists.
    ///
    /// Returns whether a row was inserted. Existing rows keep their flags.
    pub async fn insert_if_absent(&self, record: &FileRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO files (id, name, path, initial_size, current_size, deleted, converted, processed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.path)
        .bind(record.initial_size)
        .bind(record.current_size)
        .bind(record.deleted)
        .bind(record.converted)
        .bind(record.processed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Store `record` after its path (and therefore id) changed.
    ///
    /// The row under `old_id` is removed in the same transaction so the
    /// vanished path does not linger as a second record.
    pub async fn replace_path(&self, old_id: &str, record: &FileRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        if old_id != record.id {
            sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;
        }
        upsert_with(&mut *tx, record).await?;
        tx.commit().await?;
        debug!("Moved file record {} -> {}", old_id, record.path);
        Ok(())
    }

    pub async fn exists_by_path(&self, path: &str) -> Result<bool, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(1) FROM files WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let record = sqlx::query_as::<_, FileRecord>(&format!("{} WHERE path = ?", SELECT_FILES))
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn list_all(&self) -> Result<Vec<FileRecord>, StoreError> {
        let records = sqlx::query_as::<_, FileRecord>(&format!("{} ORDER BY path", SELECT_FILES))
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Records matching both flags.
    pub async fn list_by(&self, converted: bool, deleted: bool) -> Result<Vec<FileRecord>, StoreError> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "{} WHERE converted = ? AND deleted = ? ORDER BY path",
            SELECT_FILES
        ))
        .bind(converted)
        .bind(deleted)
        .fetch_all(&self.pool)
        .await?;
        debug!(
            "Found {} files with converted={} deleted={}",
            records.len(),
            converted,
            deleted
        );
        Ok(records)
    }

    /// [`Store::list_by`] restricted to records that still exist.
    pub async fn list_by_converted(&self, converted: bool) -> Result<Vec<FileRecord>, StoreError> {
        self.list_by(converted, false).await
    }

    pub async fn list_by_processed(
        &self,
        processed: bool,
        deleted: bool,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "{} WHERE processed = ? AND deleted = ? ORDER BY path",
            SELECT_FILES
        ))
        .bind(processed)
        .bind(deleted)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(1) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Sum of `initial_size - current_size` over every row; 0 when empty.
    pub async fn total_bytes_saved(&self) -> Result<i64, StoreError> {
        let (saved, _) = self.size_sums().await?;
        Ok(saved)
    }

    /// Saved bytes as a percentage of all initial bytes; 0 when there are none.
    pub async fn percent_saved(&self) -> Result<f64, StoreError> {
        let (saved, total) = self.size_sums().await?;
        Ok(percent_of(saved, total))
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let count = self.count().await?;
        let (saved, total) = self.size_sums().await?;
        Ok(StoreStats {
            count,
            total_bytes_saved: saved,
            percent_saved: percent_of(saved, total),
        })
    }

    async fn size_sums(&self) -> Result<(i64, i64), StoreError> {
        let sums: (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(initial_size - current_size), 0), COALESCE(SUM(initial_size), 0) FROM files",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(sums)
    }

    /// Reclaim free pages.
    pub async fn compact(&self) -> Result<(), StoreError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        info!("Database vacuumed");
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        debug!("Saved setting: {}", key);
        Ok(())
    }

    pub async fn list_settings(&self) -> Result<Vec<Setting>, StoreError> {
        let settings = sqlx::query_as::<_, Setting>("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(settings)
    }
}

async fn upsert_with<'e, E>(executor: E, record: &FileRecord) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO files (id, name, path, initial_size, current_size, deleted, converted, processed)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            path = excluded.path,
            initial_size = excluded.initial_size,
            current_size = excluded.current_size,
            deleted = excluded.deleted,
            converted = excluded.converted,
            processed = excluded.processed
        "#,
    )
    .bind(&record.id)
    .bind(&record.name)
    .bind(&record.path)
    .bind(record.initial_size)
    .bind(record.current_size)
    .bind(record.deleted)
    .bind(record.converted)
    .bind(record.processed)
    .execute(executor)
    .await?;
    Ok(())
}

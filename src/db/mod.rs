// db/mod.rs - Local SQLite store (C1): connection, migrations, per-backend isolation.

pub mod credentials;
pub mod crypto;
pub mod migrations;
pub mod queries;
pub mod sync_meta;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::{Error, Result};

/// A handle onto the local store scoped to one `backend_id`.
///
/// Two `Store` values constructed from the same physical file with
/// different `backend_id`s see wholly disjoint data: every query method on
/// this type binds `self.backend_id` into its `WHERE` clause. Cloning a
/// `Store` is cheap (the pool is reference-counted internally by `sqlx`).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    backend_id: String,
}

impl Store {
    /// Open (creating if necessary) the SQLite file at `path`, run pending
    /// migrations, and return a handle scoped to `backend_id`.
    ///
    /// Busy timeout is 5s per spec §4.1; WAL journaling permits concurrent
    /// readers during a writer; foreign keys are enforced.
    pub async fn open(path: &Path, backend_id: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_url = format!("sqlite:{}", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| Error::Config(format!("invalid database path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        migrations::run(&pool).await?;

        Ok(Self {
            pool,
            backend_id: backend_id.into(),
        })
    }

    /// Open a real-file store under a caller-owned temp directory for tests.
    /// WAL/busy-timeout semantics are part of what this crate tests, so
    /// `:memory:` is deliberately not used here.
    #[cfg(test)]
    pub async fn open_temp(backend_id: impl Into<String>) -> (Self, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.db");
        let store = Self::open(&path, backend_id).await.expect("open store");
        (store, dir)
    }

    /// Another handle onto the same physical file, scoped to a different backend.
    pub fn with_backend(&self, backend_id: impl Into<String>) -> Self {
        Self {
            pool: self.pool.clone(),
            backend_id: backend_id.into(),
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rewrite the database file to reclaim space; records `last_vacuum`.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        let now = chrono::Utc::now();
        sqlx::query(
            r#"
            INSERT INTO store_meta (backend_id, last_vacuum)
            VALUES (?, ?)
            ON CONFLICT(backend_id) DO UPDATE SET last_vacuum = excluded.last_vacuum
            "#,
        )
        .bind(&self.backend_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Database byte size on disk, via `PRAGMA page_count`/`page_size`.
    pub async fn byte_size(&self) -> Result<u64> {
        let (page_count,): (i64,) = sqlx::query_as("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?;
        let (page_size,): (i64,) = sqlx::query_as("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?;
        Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
    }

    pub async fn last_vacuum(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let row: Option<(Option<chrono::DateTime<chrono::Utc>>,)> =
            sqlx::query_as("SELECT last_vacuum FROM store_meta WHERE backend_id = ?")
                .bind(&self.backend_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(v,)| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distinct_backend_ids_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");

        let a = Store::open(&path, "backend-a").await.unwrap();
        let b = a.with_backend("backend-b");

        let list = crate::model::List {
            id: crate::model::ListId::new(),
            backend_id: a.backend_id().to_string(),
            name: "Work".to_string(),
            color: "#FFFFFF".to_string(),
            description: None,
            modified: chrono::Utc::now(),
            deleted_at: None,
        };
        queries::create_list(a.pool(), a.backend_id(), &list).await.unwrap();

        let seen_by_a = queries::get_lists(&a).await.unwrap();
        let seen_by_b = queries::get_lists(&b).await.unwrap();
        assert_eq!(seen_by_a.len(), 1);
        assert_eq!(seen_by_b.len(), 0);
    }

    #[tokio::test]
    async fn vacuum_records_last_vacuum() {
        let (store, _dir) = Store::open_temp("sqlite").await;
        assert!(store.last_vacuum().await.unwrap().is_none());
        store.vacuum().await.unwrap();
        assert!(store.last_vacuum().await.unwrap().is_some());
    }
}

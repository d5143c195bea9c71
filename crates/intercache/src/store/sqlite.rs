//! # SQLite Metadata Store
//!
//! One row per cached response, keyed by the cache key. The primary key turns
//! a second insert for the same key into a `KeyConflict`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use tokio::fs;
use tracing::{info, warn};

use crate::codec::BodyMode;
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::request::Headers;

use super::{BodyLocator, CacheRecord, MetadataStore, StoreStats};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cache_records (
    key TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    mode TEXT NOT NULL,
    headers TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    body TEXT NOT NULL,
    size INTEGER NOT NULL,
    digest TEXT NOT NULL
)";

const SELECT_RECORD: &str = "SELECT key, url, status, content_type, mode, headers, stored_at, \
     body, size, digest FROM cache_records WHERE key = ?";

const INSERT_RECORD: &str = "INSERT INTO cache_records \
     (key, url, status, content_type, mode, headers, stored_at, body, size, digest) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT(key) DO NOTHING";

#[derive(Debug, FromRow)]
struct RecordRow {
    key: String,
    url: String,
    status: u16,
    content_type: Option<String>,
    mode: Json<BodyMode>,
    headers: Json<Headers>,
    stored_at: DateTime<Utc>,
    body: Json<BodyLocator>,
    size: i64,
    digest: String,
}

impl TryFrom<RecordRow> for CacheRecord {
    type Error = CacheError;

    fn try_from(row: RecordRow) -> CacheResult<Self> {
        let size = u64::try_from(row.size)
            .map_err(|_| CacheError::Decode(format!("negative body size for {}", row.key)))?;
        Ok(CacheRecord {
            key: CacheKey::from(row.key),
            url: row.url,
            status: row.status,
            content_type: row.content_type,
            mode: row.mode.0,
            headers: row.headers.0,
            stored_at: row.stored_at,
            body: row.body.0,
            size,
            digest: row.digest,
        })
    }
}

pub struct SqliteMetadataStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl SqliteMetadataStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> CacheResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let store = Self::connect(options, Some(path)).await?;
        info!(path = ?store.path, "Opened metadata database");
        Ok(store)
    }

    /// A store that lives only as long as this value.
    pub async fn open_in_memory() -> CacheResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options, None).await
    }

    async fn connect(options: SqliteConnectOptions, path: Option<PathBuf>) -> CacheResult<Self> {
        // A single connection keeps writes serialised and an in-memory
        // database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool, path })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn fetch(&self, key: &CacheKey) -> CacheResult<Option<CacheRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(SELECT_RECORD)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(CacheRecord::try_from).transpose()
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find(&self, key: &CacheKey) -> Option<CacheRecord> {
        match self.fetch(key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cache record");
                None
            }
        }
    }

    async fn insert(&self, record: CacheRecord) -> CacheResult<()> {
        let size = i64::try_from(record.size)
            .map_err(|_| CacheError::Decode(format!("body too large to record: {}", record.size)))?;

        let result = sqlx::query(INSERT_RECORD)
            .bind(record.key.as_str())
            .bind(&record.url)
            .bind(record.status)
            .bind(record.content_type.as_deref())
            .bind(Json(record.mode))
            .bind(Json(&record.headers))
            .bind(record.stored_at)
            .bind(Json(&record.body))
            .bind(size)
            .bind(&record.digest)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CacheError::KeyConflict(record.key.to_string()));
        }
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        sqlx::query("DELETE FROM cache_records WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        sqlx::query("DELETE FROM cache_records")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> StoreStats {
        let totals = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM cache_records",
        )
        .fetch_one(&self.pool)
        .await;

        match totals {
            Ok((entries, body_bytes)) => StoreStats {
                entries: usize::try_from(entries).unwrap_or_default(),
                body_bytes: u64::try_from(body_bytes).unwrap_or_default(),
            },
            Err(e) => {
                warn!(error = %e, "Failed to read cache statistics");
                StoreStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, text: &str) -> CacheRecord {
        CacheRecord {
            key: CacheKey::from(key.to_string()),
            url: format!("http://localhost{key}"),
            status: 200,
            content_type: Some("text/plain".to_string()),
            mode: BodyMode::Text,
            headers: Headers::from([("x-served-by".to_string(), "origin".to_string())]),
            stored_at: Utc::now(),
            body: BodyLocator::Inline {
                text: text.to_string(),
            },
            size: text.len() as u64,
            digest: String::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_find_remove() {
        let store = SqliteMetadataStore::open_in_memory().await.unwrap();
        let rec = record("/a", "hello");

        assert!(store.find(&rec.key).await.is_none());
        store.insert(rec.clone()).await.unwrap();

        let found = store.find(&rec.key).await.unwrap();
        assert_eq!(found.url, rec.url);
        assert_eq!(found.headers, rec.headers);
        assert_eq!(found.body, rec.body);
        assert_eq!(found.mode, BodyMode::Text);

        store.remove(&rec.key).await.unwrap();
        assert!(store.find(&rec.key).await.is_none());
        // removing a missing key is fine
        store.remove(&rec.key).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = SqliteMetadataStore::open_in_memory().await.unwrap();
        store.insert(record("/a", "first")).await.unwrap();

        let err = store.insert(record("/a", "second")).await.unwrap_err();
        assert!(err.is_conflict());

        let found = store.find(&CacheKey::from("/a".to_string())).await.unwrap();
        assert_eq!(
            found.body,
            BodyLocator::Inline {
                text: "first".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        let mut rec = record("/persisted", "kept");
        rec.body = BodyLocator::Blob {
            name: "ab12-cd34".to_string(),
        };
        rec.mode = BodyMode::Binary;

        {
            let store = SqliteMetadataStore::open(&path).await.unwrap();
            store.insert(rec.clone()).await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteMetadataStore::open(&path).await.unwrap();
        let found = store.find(&rec.key).await.unwrap();
        assert_eq!(found.body, rec.body);
        assert_eq!(found.mode, BodyMode::Binary);
        assert_eq!(found.stored_at.timestamp(), rec.stored_at.timestamp());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let store = SqliteMetadataStore::open_in_memory().await.unwrap();
        store.insert(record("/one", "1")).await.unwrap();
        store.insert(record("/two", "22")).await.unwrap();

        assert_eq!(
            store.stats().await,
            StoreStats {
                entries: 2,
                body_bytes: 3
            }
        );

        store.clear().await.unwrap();
        assert_eq!(store.stats().await, StoreStats::default());
        assert!(store.find(&CacheKey::from("/one".to_string())).await.is_none());
    }
}

//! Durable crawl frontier backed by a single sqlite table.
//!
//! Every url lives in exactly one row keyed by the SHA-512 of its exact
//! string. Rows only move `NEW -> PROCESSING -> {COMPLETED, ERROR}`; the
//! only way back is [`FrontierStore::reset`], which discards the whole table.

use crate::{
    utils::{self, url_hash},
    CrawlerError, Table,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow},
    Row, SqliteConnection, SqlitePool,
};
use std::{fmt, path::Path, time::Duration};
use tracing::{debug, warn};

pub const TABLE_NAME: &str = "crawl_urls";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrlStatus {
    New = 0,
    Processing = 1,
    Completed = 2,
    Error = 3,
}

impl UrlStatus {
    pub const ALL: [UrlStatus; 4] = [
        UrlStatus::New,
        UrlStatus::Processing,
        UrlStatus::Completed,
        UrlStatus::Error,
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<UrlStatus> {
        UrlStatus::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UrlStatus::New => "NEW",
            UrlStatus::Processing => "PROCESSING",
            UrlStatus::Completed => "COMPLETED",
            UrlStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrontierEntry {
    pub url_hash: String,
    pub url: String,
    pub depth: u32,
    pub status: UrlStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FrontierEntry {
    fn from_row(row: &SqliteRow) -> Result<FrontierEntry, sqlx::Error> {
        let code: i64 = row.try_get("status")?;
        let status = UrlStatus::from_code(code).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: format!("unknown status code {}", code).into(),
        })?;

        Ok(FrontierEntry {
            url_hash: row.try_get("url_hash")?,
            url: row.try_get("url")?,
            depth: row.try_get("depth")?,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub struct FrontierStore {
    name: String,
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl Table for FrontierStore {
    fn get_name(&self) -> &str {
        self.name.as_str()
    }

    fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create(&self) -> Result<(), sqlx::Error> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                url_hash TEXT PRIMARY KEY NOT NULL,
                url TEXT NOT NULL,
                depth INTEGER NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
             )",
            &self.name
        );
        sqlx::query(&query).execute(self.get_pool()).await?;

        let query = format!(
            "CREATE INDEX IF NOT EXISTS status_index ON {}(status)",
            &self.name
        );
        sqlx::query(&query).execute(self.get_pool()).await?;
        Ok(())
    }
}

impl FrontierStore {
    /// Opens (creating if needed) the database file. The table itself is
    /// left alone; call [`FrontierStore::reset`] or
    /// [`FrontierStore::ensure_schema`] before use.
    pub async fn open<P: AsRef<Path>>(dbfile: P) -> Result<FrontierStore, CrawlerError> {
        let dbfile = dbfile.as_ref();
        if let Some(parent) = dbfile.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        FrontierStore::connect(dbfile, true).await
    }

    /// Opens an existing database without creating anything. `None` when
    /// the file or the frontier table is missing.
    pub async fn open_existing<P: AsRef<Path>>(
        dbfile: P,
    ) -> Result<Option<FrontierStore>, CrawlerError> {
        let dbfile = dbfile.as_ref();
        if !dbfile.is_file() {
            return Ok(None);
        }
        let store = FrontierStore::connect(dbfile, false).await?;
        if store.has_schema().await? {
            Ok(Some(store))
        } else {
            store.close().await;
            Ok(None)
        }
    }

    async fn connect(dbfile: &Path, create: bool) -> Result<FrontierStore, CrawlerError> {
        let opt = SqliteConnectOptions::new()
            .filename(dbfile)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePool::connect_with(opt).await?;
        debug!("Opened frontier database {}", dbfile.display());

        Ok(FrontierStore::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> FrontierStore {
        FrontierStore {
            name: TABLE_NAME.to_string(),
            pool,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Drops and recreates the table, discarding every previous crawl.
    pub async fn reset(&self) -> Result<(), CrawlerError> {
        self.drop_table().await?;
        debug!("Dropped table {}", self.name);
        self.create().await?;
        debug!("Created table {}", self.name);
        Ok(())
    }

    pub async fn has_schema(&self) -> Result<bool, CrawlerError> {
        Ok(utils::is_table_exists(&self.pool, &self.name).await?)
    }

    pub async fn ensure_schema(&self) -> Result<(), CrawlerError> {
        if self.has_schema().await? {
            debug!("Use table {}", self.name);
        } else {
            debug!("Create table {}", self.name);
        }
        self.create().await?;
        Ok(())
    }

    /// Inserts `url` as `NEW` unless a row with the same hash already
    /// exists, in which case the existing row is left untouched.
    pub async fn enqueue<S: AsRef<str>>(&self, url: S, depth: u32) -> Result<(), CrawlerError> {
        let url = url.as_ref();
        let now = utils::get_now();
        let query = format!(
            "INSERT OR IGNORE INTO {} (url_hash, url, depth, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            self.name
        );
        sqlx::query(&query)
            .bind(url_hash(url))
            .bind(url)
            .bind(depth)
            .bind(UrlStatus::New.code())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically moves one `NEW` row to `PROCESSING` and returns its url
    /// and depth.
    ///
    /// The select and the update run inside a single `BEGIN IMMEDIATE`
    /// transaction, so the write lock is held from the first read on and
    /// concurrent callers (other tasks or other processes sharing the file)
    /// never receive the same row. On failure the transaction is rolled back
    /// and the row keeps its status.
    pub async fn claim_next(&self) -> Result<Option<(String, u32)>, CrawlerError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = self.claim_in_transaction(&mut conn).await;
        let claimed = match result {
            Ok(claimed) => claimed,
            Err(e) => {
                let rollback = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                if let Err(rollback) = rollback {
                    warn!("Rollback of claim failed: {}", rollback);
                    drop(conn.detach());
                }
                return Err(e.into());
            }
        };

        let commit = sqlx::query("COMMIT").execute(&mut *conn).await;
        if let Err(e) = commit {
            let rollback = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            if rollback.is_err() {
                drop(conn.detach());
            }
            return Err(e.into());
        }

        if let Some((url, depth)) = &claimed {
            debug!("Claimed {} (depth {})", url, depth);
        }
        Ok(claimed)
    }

    async fn claim_in_transaction(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Option<(String, u32)>, sqlx::Error> {
        let query = format!(
            "SELECT url_hash, url, depth FROM {} WHERE status = ? ORDER BY rowid LIMIT 1",
            self.name
        );
        let row = sqlx::query(&query)
            .bind(UrlStatus::New.code())
            .fetch_optional(&mut *conn)
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let hash: String = row.try_get("url_hash")?;
        let url: String = row.try_get("url")?;
        let depth: u32 = row.try_get("depth")?;

        let query = format!(
            "UPDATE {} SET status = ?, updated_at = ? WHERE url_hash = ? AND status = ?",
            self.name
        );
        sqlx::query(&query)
            .bind(UrlStatus::Processing.code())
            .bind(utils::get_now())
            .bind(hash)
            .bind(UrlStatus::New.code())
            .execute(&mut *conn)
            .await?;

        Ok(Some((url, depth)))
    }

    pub async fn mark_complete<S: AsRef<str>>(&self, url: S) -> Result<(), CrawlerError> {
        self.set_status(url.as_ref(), UrlStatus::Completed).await
    }

    pub async fn mark_error<S: AsRef<str>>(&self, url: S) -> Result<(), CrawlerError> {
        self.set_status(url.as_ref(), UrlStatus::Error).await
    }

    /// Finalizes a `PROCESSING` row. Rows in any other status (unclaimed,
    /// already settled, or absent) are left untouched.
    async fn set_status(&self, url: &str, status: UrlStatus) -> Result<(), CrawlerError> {
        let query = format!(
            "UPDATE {} SET status = ?, updated_at = ? WHERE url_hash = ? AND status = ?",
            self.name
        );
        let updated = sqlx::query(&query)
            .bind(status.code())
            .bind(utils::get_now())
            .bind(url_hash(url))
            .bind(UrlStatus::Processing.code())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            debug!("No PROCESSING row for {}, {} not recorded", url, status);
        }
        Ok(())
    }

    /// Every row in insertion order, regardless of status.
    pub async fn list_all(&self) -> Result<Vec<FrontierEntry>, CrawlerError> {
        let query = format!(
            "SELECT url_hash, url, depth, status, created_at, updated_at FROM {} ORDER BY rowid",
            self.name
        );
        let mut entries = vec![];
        for row in sqlx::query(&query).fetch_all(&self.pool).await? {
            entries.push(FrontierEntry::from_row(&row)?);
        }
        Ok(entries)
    }

    pub async fn count_by_status(&self, status: UrlStatus) -> Result<u32, CrawlerError> {
        let query = format!("SELECT COUNT(*) FROM {} WHERE status = ?", self.name);
        Ok(sqlx::query(&query)
            .bind(status.code())
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{collections::HashSet, sync::Arc};
    use tempfile::TempDir;

    async fn temp_store() -> (TempDir, FrontierStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FrontierStore::open(dir.path().join("crawl.db")).await.unwrap();
        store.reset().await.unwrap();
        (dir, store)
    }

    async fn entry(store: &FrontierStore, url: &str) -> Option<FrontierEntry> {
        store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.url == url)
    }

    #[tokio::test]
    async fn open_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").join("crawl.db");
        assert!(!path.is_file());

        let store = FrontierStore::open(&path).await.unwrap();
        store.ensure_schema().await.unwrap();
        assert!(path.is_file());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let (_dir, store) = temp_store().await;
        store.enqueue("http://a/", 1).await.unwrap();

        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reset_discards_history() {
        let (_dir, store) = temp_store().await;
        store.enqueue("http://a/", 1).await.unwrap();
        store.enqueue("http://b/", 1).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        store.reset().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.claim_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn enqueue_keeps_first_write() {
        let (_dir, store) = temp_store().await;
        store.enqueue("http://a/", 3).await.unwrap();
        store.enqueue("http://a/", 7).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].url, "http://a/");
        assert_eq!(all[0].url_hash, url_hash("http://a/"));
        assert_eq!(all[0].depth, 3);
        assert_eq!(all[0].status, UrlStatus::New);
    }

    #[tokio::test]
    async fn enqueue_does_not_revive_settled_rows() {
        let (_dir, store) = temp_store().await;
        store.enqueue("http://a/", 1).await.unwrap();
        store.claim_next().await.unwrap();
        store.mark_complete("http://a/").await.unwrap();

        store.enqueue("http://a/", 5).await.unwrap();
        let e = entry(&store, "http://a/").await.unwrap();
        assert_eq!(e.status, UrlStatus::Completed);
        assert_eq!(e.depth, 1);
    }

    #[tokio::test]
    async fn url_variants_are_distinct_rows() {
        let (_dir, store) = temp_store().await;
        for url in ["http://a/p", "http://a/P", "http://a/p?q=1", "http://a/p#x"] {
            store.enqueue(url, 0).await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn claim_round_trip() {
        let (_dir, store) = temp_store().await;
        store.enqueue("http://a/", 3).await.unwrap();

        assert_eq!(
            store.claim_next().await.unwrap(),
            Some(("http://a/".to_string(), 3))
        );
        assert_eq!(
            entry(&store, "http://a/").await.unwrap().status,
            UrlStatus::Processing
        );
        assert_eq!(store.claim_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn claim_follows_insertion_order() {
        let (_dir, store) = temp_store().await;
        store.enqueue("http://c/", 0).await.unwrap();
        store.enqueue("http://a/", 1).await.unwrap();
        store.enqueue("http://b/", 2).await.unwrap();

        let mut claimed = vec![];
        while let Some((url, _)) = store.claim_next().await.unwrap() {
            claimed.push(url);
        }
        assert_eq!(claimed, vec!["http://c/", "http://a/", "http://b/"]);
    }

    #[tokio::test]
    async fn mark_complete_and_error_are_idempotent() {
        let (_dir, store) = temp_store().await;
        store.enqueue("http://ok/", 0).await.unwrap();
        store.enqueue("http://bad/", 0).await.unwrap();
        store.claim_next().await.unwrap();
        store.claim_next().await.unwrap();

        store.mark_complete("http://ok/").await.unwrap();
        store.mark_error("http://bad/").await.unwrap();
        let ok = entry(&store, "http://ok/").await.unwrap();
        let bad = entry(&store, "http://bad/").await.unwrap();
        assert_eq!(ok.status, UrlStatus::Completed);
        assert_eq!(bad.status, UrlStatus::Error);

        store.mark_complete("http://ok/").await.unwrap();
        store.mark_error("http://bad/").await.unwrap();
        assert_eq!(entry(&store, "http://ok/").await.unwrap().status, UrlStatus::Completed);
        assert_eq!(entry(&store, "http://bad/").await.unwrap().status, UrlStatus::Error);
        assert!(ok.updated_at >= ok.created_at);
    }

    #[tokio::test]
    async fn mark_only_finalizes_processing_rows() {
        let (_dir, store) = temp_store().await;
        store.enqueue("http://a/", 1).await.unwrap();

        store.mark_complete("http://a/").await.unwrap();
        store.mark_error("http://a/").await.unwrap();
        assert_eq!(entry(&store, "http://a/").await.unwrap().status, UrlStatus::New);

        store.claim_next().await.unwrap();
        store.mark_complete("http://a/").await.unwrap();
        store.mark_error("http://a/").await.unwrap();
        assert_eq!(
            entry(&store, "http://a/").await.unwrap().status,
            UrlStatus::Completed
        );
    }

    #[tokio::test]
    async fn open_existing_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").join("crawl.db");
        assert!(FrontierStore::open_existing(&path).await.unwrap().is_none());
        assert!(!path.exists());
        assert!(!dir.path().join("log").exists());

        let store = FrontierStore::open(&path).await.unwrap();
        assert!(!store.has_schema().await.unwrap());
        store.close().await;
        assert!(FrontierStore::open_existing(&path).await.unwrap().is_none());

        let store = FrontierStore::open(&path).await.unwrap();
        assert!(!store.has_schema().await.unwrap());
        store.ensure_schema().await.unwrap();
        store.enqueue("http://a/", 0).await.unwrap();
        store.close().await;

        let store = FrontierStore::open_existing(&path).await.unwrap().unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_missing_url_is_noop() {
        let (_dir, store) = temp_store().await;
        store.mark_complete("http://nowhere/").await.unwrap();
        store.mark_error("http://nowhere/").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn count_by_status() {
        let (_dir, store) = temp_store().await;
        for i in 0..5 {
            store.enqueue(format!("http://a/{}", i), 0).await.unwrap();
        }
        store.claim_next().await.unwrap();
        let (second, _) = store.claim_next().await.unwrap().unwrap();
        store.mark_error(&second).await.unwrap();

        assert_eq!(store.count_by_status(UrlStatus::New).await.unwrap(), 3);
        assert_eq!(store.count_by_status(UrlStatus::Processing).await.unwrap(), 1);
        assert_eq!(store.count_by_status(UrlStatus::Completed).await.unwrap(), 0);
        assert_eq!(store.count_by_status(UrlStatus::Error).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_are_disjoint() {
        let (_dir, store) = temp_store().await;
        for i in 0..40 {
            store.enqueue(format!("http://a/{}", i), 1).await.unwrap();
        }

        let store = Arc::new(store);
        let mut handles = vec![];
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut claimed = vec![];
                while let Some((url, _)) = store.claim_next().await.unwrap() {
                    claimed.push(url);
                }
                claimed
            }));
        }

        let mut all = vec![];
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 40);
        assert_eq!(unique.len(), 40);
        assert_eq!(store.count_by_status(UrlStatus::Processing).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn two_stores_on_one_file_share_claims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.db");
        let first = FrontierStore::open(&path).await.unwrap();
        first.reset().await.unwrap();
        first.enqueue("http://a/", 0).await.unwrap();

        let second = FrontierStore::open(&path).await.unwrap();
        second.ensure_schema().await.unwrap();

        assert!(first.claim_next().await.unwrap().is_some());
        assert_eq!(second.claim_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn orphaned_processing_rows_survive_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.db");
        {
            let store = FrontierStore::open(&path).await.unwrap();
            store.reset().await.unwrap();
            store.enqueue("http://a/", 2).await.unwrap();
            store.enqueue("http://b/", 2).await.unwrap();
            store.claim_next().await.unwrap();
            store.close().await;
        }

        let store = FrontierStore::open(&path).await.unwrap();
        store.ensure_schema().await.unwrap();
        assert_eq!(
            entry(&store, "http://a/").await.unwrap().status,
            UrlStatus::Processing
        );
        assert_eq!(
            store.claim_next().await.unwrap(),
            Some(("http://b/".to_string(), 2))
        );
        assert_eq!(store.claim_next().await.unwrap(), None);
        assert_eq!(
            entry(&store, "http://a/").await.unwrap().status,
            UrlStatus::Processing
        );
    }

    #[test]
    fn status_codes() {
        for s in UrlStatus::ALL {
            assert_eq!(UrlStatus::from_code(s.code()), Some(s));
        }
        assert_eq!(UrlStatus::from_code(9), None);
        assert_eq!(UrlStatus::Completed.to_string(), "COMPLETED");
    }
}

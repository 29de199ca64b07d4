//! libSQL-backed site-partitioned store.
//!
//! Each crawled site owns a logical partition: its chunks, its dedup hashes,
//! and its counters live under the site key and never interact with another
//! site's. Retrieval can target one partition or rank across all of them.
//!
//! Embeddings are produced by a caller-supplied [`Embedder`]; the store only
//! persists the vectors (JSON-encoded) and ranks by cosine distance at query
//! time.

mod migrations;

pub mod chunk;
pub mod embed;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use uuid::Uuid;

use siteminer_shared::{
    JobId, JobState, OptimizationStats, PageRecord, Result, SiteMinerError,
};

pub use chunk::chunk_words;
pub use embed::{Embedder, FeatureHashEmbedder, cosine_distance, cosine_similarity};

/// Outcome of writing one page record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Content was new for the site; this many chunks were appended.
    Stored { chunks: u64 },
    /// The content hash was already present in the site's partition.
    DuplicateContent,
}

/// One retrieved chunk with its query distance.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub site: String,
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Cosine distance to the query (lower is closer).
    pub distance: f32,
}

/// Counters for one site partition.
#[derive(Debug, Clone)]
pub struct SiteStats {
    pub site: String,
    pub pages: u64,
    pub chunks: u64,
    pub updated_at: DateTime<Utc>,
}

/// A durable job row.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: JobId,
    pub site: String,
    pub root_url: String,
    pub state: JobState,
    pub stats: Option<OptimizationStats>,
    pub error: Option<String>,
}

/// Site-partitioned store over a local libSQL database.
pub struct SiteStore {
    db: Database,
    conn: Connection,
    embedder: Arc<dyn Embedder>,
    chunk_size_words: usize,
}

fn storage_err(e: impl std::fmt::Display) -> SiteMinerError {
    SiteMinerError::Storage(e.to_string())
}

impl SiteStore {
    /// Open or create a database at `path` and run pending migrations.
    pub async fn open(
        path: &Path,
        embedder: Arc<dyn Embedder>,
        chunk_size_words: usize,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SiteMinerError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let store = Self {
            db,
            conn,
            embedder,
            chunk_size_words,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SiteMinerError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write one deduplicated page record into its site partition.
    ///
    /// The content hash acts as the durable dedup gate: if this site already
    /// holds the hash (from any earlier job), nothing is written.
    pub async fn write(&self, record: &PageRecord) -> Result<WriteOutcome> {
        if self
            .hash_present(&record.site, &record.content_hash)
            .await?
        {
            tracing::debug!(
                site = %record.site,
                hash = %record.content_hash,
                "content hash already stored, skipping write"
            );
            return Ok(WriteOutcome::DuplicateContent);
        }

        let pieces = chunk_words(&record.content, self.chunk_size_words);
        let total = pieces.len() as u32;

        // Embed everything up front so embedder failures touch no rows.
        let mut embeddings = Vec::with_capacity(pieces.len());
        for text in &pieces {
            let embedding = self.embedder.embed(text).await?;
            embeddings.push(serde_json::to_string(&embedding).map_err(storage_err)?);
        }

        // All rows for one record commit together; a failure mid-write
        // rolls back so a retry starts from a clean partition.
        let conn = self.db.connect().map_err(storage_err)?;
        let tx = conn.transaction().await.map_err(storage_err)?;

        for (index, (text, embedding_json)) in pieces.iter().zip(&embeddings).enumerate() {
            tx.execute(
                "INSERT INTO chunks (id, site, url, title, chunk_index, total_chunks, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    Uuid::now_v7().to_string(),
                    record.site.as_str(),
                    record.url.as_str(),
                    record.title.as_deref(),
                    index as i64,
                    total as i64,
                    text.as_str(),
                    embedding_json.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        }

        tx.execute(
            "INSERT INTO content_hashes (site, hash) VALUES (?1, ?2)",
            params![record.site.as_str(), record.content_hash.as_str()],
        )
        .await
        .map_err(storage_err)?;

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO site_partitions (site, pages, chunks, updated_at)
             VALUES (?1, 1, ?2, ?3)
             ON CONFLICT(site) DO UPDATE SET
               pages = pages + 1,
               chunks = chunks + excluded.chunks,
               updated_at = excluded.updated_at",
            params![record.site.as_str(), total as i64, now.as_str()],
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        Ok(WriteOutcome::Stored {
            chunks: u64::from(total),
        })
    }

    async fn hash_present(&self, site: &str, hash: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM content_hashes WHERE site = ?1 AND hash = ?2",
                params![site, hash],
            )
            .await
            .map_err(storage_err)?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Rank chunks by cosine distance to `text`, ascending, and return the
    /// global top `k`.
    ///
    /// With `site = Some(..)` only that partition is searched; with `None`
    /// every partition is ranked independently and results are merged by
    /// distance alone, so a well-matching chunk from a small site outranks a
    /// poor match from a large one.
    pub async fn query(
        &self,
        site: Option<&str>,
        text: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(text).await?;

        let mut rows = match site {
            Some(site) => self
                .conn
                .query(
                    "SELECT site, url, title, chunk_index, total_chunks, text, embedding
                     FROM chunks WHERE site = ?1",
                    params![site],
                )
                .await
                .map_err(storage_err)?,
            None => self
                .conn
                .query(
                    "SELECT site, url, title, chunk_index, total_chunks, text, embedding
                     FROM chunks",
                    params![],
                )
                .await
                .map_err(storage_err)?,
        };

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let embedding_json: String = row.get(6).map_err(storage_err)?;
            let embedding: Vec<f32> =
                serde_json::from_str(&embedding_json).map_err(storage_err)?;
            results.push(RetrievedChunk {
                site: row.get::<String>(0).map_err(storage_err)?,
                url: row.get::<String>(1).map_err(storage_err)?,
                title: row.get::<String>(2).ok(),
                chunk_index: row.get::<i64>(3).map_err(storage_err)? as u32,
                total_chunks: row.get::<i64>(4).map_err(storage_err)? as u32,
                text: row.get::<String>(5).map_err(storage_err)?,
                distance: cosine_distance(&query_vec, &embedding),
            });
        }

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Partition management
    // -----------------------------------------------------------------------

    /// Counters for one site, or `None` if the site has no partition.
    pub async fn stats(&self, site: &str) -> Result<Option<SiteStats>> {
        let mut rows = self
            .conn
            .query(
                "SELECT site, pages, chunks, updated_at FROM site_partitions WHERE site = ?1",
                params![site],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_site_stats(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// All site partitions, ordered by site name.
    pub async fn list_sites(&self) -> Result<Vec<SiteStats>> {
        let mut rows = self
            .conn
            .query(
                "SELECT site, pages, chunks, updated_at FROM site_partitions ORDER BY site",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_site_stats(&row)?);
        }
        Ok(results)
    }

    /// Remove a site's partition: chunks, dedup hashes, and counters.
    /// Job history rows are kept.
    pub async fn delete_site(&self, site: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM chunks WHERE site = ?1", params![site])
            .await
            .map_err(storage_err)?;
        self.conn
            .execute("DELETE FROM content_hashes WHERE site = ?1", params![site])
            .await
            .map_err(storage_err)?;
        self.conn
            .execute("DELETE FROM site_partitions WHERE site = ?1", params![site])
            .await
            .map_err(storage_err)?;
        tracing::info!(%site, "deleted site partition");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Job persistence
    // -----------------------------------------------------------------------

    /// Insert or update a job row with its current state.
    pub async fn upsert_job(&self, job: &StoredJob) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let stats_json = match &job.stats {
            Some(stats) => Some(serde_json::to_string(stats).map_err(storage_err)?),
            None => None,
        };
        self.conn
            .execute(
                "INSERT INTO jobs (id, site, root_url, state, stats_json, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   state = excluded.state,
                   stats_json = excluded.stats_json,
                   error = excluded.error,
                   updated_at = excluded.updated_at",
                params![
                    job.id.to_string(),
                    job.site.as_str(),
                    job.root_url.as_str(),
                    job.state.to_string(),
                    stats_json.as_deref(),
                    job.error.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Load a job row by ID.
    pub async fn load_job(&self, id: JobId) -> Result<Option<StoredJob>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, site, root_url, state, stats_json, error FROM jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: String = row.get(0).map_err(storage_err)?;
                let state: String = row.get(3).map_err(storage_err)?;
                let stats_json: Option<String> = row.get(4).ok();
                let stats = match stats_json {
                    Some(json) => {
                        Some(serde_json::from_str(&json).map_err(storage_err)?)
                    }
                    None => None,
                };
                Ok(Some(StoredJob {
                    id: id.parse().map_err(storage_err)?,
                    site: row.get::<String>(1).map_err(storage_err)?,
                    root_url: row.get::<String>(2).map_err(storage_err)?,
                    state: state.parse().map_err(storage_err)?,
                    stats,
                    error: row.get::<String>(5).ok(),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }
}

fn row_to_site_stats(row: &libsql::Row) -> Result<SiteStats> {
    let updated: String = row.get(3).map_err(storage_err)?;
    Ok(SiteStats {
        site: row.get::<String>(0).map_err(storage_err)?,
        pages: row.get::<i64>(1).map_err(storage_err)? as u64,
        chunks: row.get::<i64>(2).map_err(storage_err)? as u64,
        updated_at: DateTime::parse_from_rfc3339(&updated)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SiteMinerError::Storage(format!("invalid date: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use siteminer_shared::{ContactInfo, PageType};

    /// Deterministic bag-of-bytes embedder for tests: texts sharing bytes
    /// land close together, disjoint texts far apart.
    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; 16];
            for b in text.bytes() {
                v[(b as usize) % 16] += 1.0;
            }
            Ok(v)
        }
    }

    async fn test_store() -> SiteStore {
        let tmp = std::env::temp_dir().join(format!("sm_test_{}.db", Uuid::now_v7()));
        SiteStore::open(&tmp, Arc::new(HashEmbedder), 50)
            .await
            .expect("open test db")
    }

    fn record(site: &str, url: &str, content: &str, hash: &str) -> PageRecord {
        PageRecord {
            url: url.into(),
            site: site.into(),
            title: Some("Page".into()),
            content: content.into(),
            page_type: PageType::General,
            products: Vec::new(),
            contacts: ContactInfo::default(),
            content_hash: hash.into(),
            fetched_at: Utc::now(),
            word_count: content.split_whitespace().count(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("sm_test_{}.db", Uuid::now_v7()));
        let s1 = SiteStore::open(&tmp, Arc::new(HashEmbedder), 50)
            .await
            .expect("first open");
        drop(s1);
        let s2 = SiteStore::open(&tmp, Arc::new(HashEmbedder), 50)
            .await
            .expect("second open");
        assert_eq!(s2.schema_version().await, 1);
    }

    #[tokio::test]
    async fn duplicate_hash_rejected_within_site() {
        let store = test_store().await;

        let first = store
            .write(&record("a.test", "https://a.test/1", "alpha beta", "h1"))
            .await
            .expect("first write");
        assert!(matches!(first, WriteOutcome::Stored { chunks: 1 }));

        // Same hash, different URL: the partition already holds the content.
        let second = store
            .write(&record("a.test", "https://a.test/2", "alpha beta", "h1"))
            .await
            .expect("second write");
        assert_eq!(second, WriteOutcome::DuplicateContent);

        let stats = store.stats("a.test").await.unwrap().unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.chunks, 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_rows() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        /// Fails the second embed call while `failing` is set.
        struct FlakyEmbedder {
            failing: AtomicBool,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Embedder for FlakyEmbedder {
            async fn embed(&self, text: &str) -> Result<Vec<f32>> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if self.failing.load(Ordering::SeqCst) && call == 1 {
                    return Err(SiteMinerError::Storage("embedder offline".into()));
                }
                let mut v = vec![0.0f32; 16];
                for b in text.bytes() {
                    v[(b as usize) % 16] += 1.0;
                }
                Ok(v)
            }
        }

        let embedder = Arc::new(FlakyEmbedder {
            failing: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let tmp = std::env::temp_dir().join(format!("sm_test_{}.db", Uuid::now_v7()));
        let store = SiteStore::open(&tmp, embedder.clone(), 50)
            .await
            .expect("open test db");

        let content = "word ".repeat(120); // 3 chunks
        let rec = record("a.test", "https://a.test/long", &content, "h1");
        assert!(store.write(&rec).await.is_err());

        // No orphan chunks, no counters, and no hash row from the failure.
        assert!(store.query(Some("a.test"), "word", 10).await.unwrap().is_empty());
        assert!(store.stats("a.test").await.unwrap().is_none());

        // A retry starts clean and writes the full record.
        embedder.failing.store(false, Ordering::SeqCst);
        let retried = store.write(&rec).await.expect("retried write");
        assert!(matches!(retried, WriteOutcome::Stored { chunks: 3 }));

        let chunks = store.query(Some("a.test"), "word", 10).await.unwrap();
        assert_eq!(chunks.len(), 3);
        let stats = store.stats("a.test").await.unwrap().unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.chunks, 3);
    }

    #[tokio::test]
    async fn same_hash_stored_independently_per_site() {
        let store = test_store().await;
        store
            .write(&record("a.test", "https://a.test/p", "shared", "h1"))
            .await
            .unwrap();

        let other = store
            .write(&record("b.test", "https://b.test/p", "shared", "h1"))
            .await
            .expect("write to second site");
        assert!(matches!(other, WriteOutcome::Stored { .. }));
    }

    #[tokio::test]
    async fn long_content_chunked_with_metadata() {
        let store = test_store().await;
        let content = "word ".repeat(120); // 120 words, chunk size 50 -> 3 chunks
        store
            .write(&record("a.test", "https://a.test/long", &content, "h1"))
            .await
            .unwrap();

        let chunks = store.query(Some("a.test"), "word", 10).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.total_chunks == 3));
        let mut indexes: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        indexes.sort_unstable();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn query_scoped_to_one_partition() {
        let store = test_store().await;
        store
            .write(&record("a.test", "https://a.test/1", "alpha alpha", "h1"))
            .await
            .unwrap();
        store
            .write(&record("b.test", "https://b.test/1", "alpha alpha", "h2"))
            .await
            .unwrap();

        let results = store.query(Some("a.test"), "alpha", 10).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|c| c.site == "a.test"));
    }

    #[tokio::test]
    async fn global_query_merges_by_ascending_distance() {
        let store = test_store().await;
        store
            .write(&record("a.test", "https://a.test/1", "alpha alpha alpha", "h1"))
            .await
            .unwrap();
        store
            .write(&record("b.test", "https://b.test/1", "zzzz qqqq", "h2"))
            .await
            .unwrap();

        let results = store.query(None, "alpha alpha alpha", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].distance <= results[1].distance);
        assert_eq!(results[0].site, "a.test");
    }

    #[tokio::test]
    async fn query_respects_k() {
        let store = test_store().await;
        for i in 0..5 {
            store
                .write(&record(
                    "a.test",
                    &format!("https://a.test/{i}"),
                    &format!("content number {i}"),
                    &format!("h{i}"),
                ))
                .await
                .unwrap();
        }
        let results = store.query(Some("a.test"), "content", 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn delete_site_clears_partition_and_dedup_index() {
        let store = test_store().await;
        store
            .write(&record("a.test", "https://a.test/1", "alpha", "h1"))
            .await
            .unwrap();
        store
            .write(&record("b.test", "https://b.test/1", "beta", "h2"))
            .await
            .unwrap();

        store.delete_site("a.test").await.expect("delete site");

        assert!(store.stats("a.test").await.unwrap().is_none());
        assert!(store.query(Some("a.test"), "alpha", 10).await.unwrap().is_empty());
        // Other partitions untouched.
        assert!(store.stats("b.test").await.unwrap().is_some());

        // The hash can be written again after deletion.
        let rewrite = store
            .write(&record("a.test", "https://a.test/1", "alpha", "h1"))
            .await
            .unwrap();
        assert!(matches!(rewrite, WriteOutcome::Stored { .. }));
    }

    #[tokio::test]
    async fn list_sites_ordered() {
        let store = test_store().await;
        store
            .write(&record("b.test", "https://b.test/1", "beta", "h1"))
            .await
            .unwrap();
        store
            .write(&record("a.test", "https://a.test/1", "alpha", "h2"))
            .await
            .unwrap();

        let sites = store.list_sites().await.unwrap();
        let names: Vec<&str> = sites.iter().map(|s| s.site.as_str()).collect();
        assert_eq!(names, vec!["a.test", "b.test"]);
    }

    #[tokio::test]
    async fn job_roundtrip() {
        let store = test_store().await;
        let id = JobId::new();

        let mut job = StoredJob {
            id,
            site: "a.test".into(),
            root_url: "https://a.test".into(),
            state: JobState::Pending,
            stats: None,
            error: None,
        };
        store.upsert_job(&job).await.expect("insert job");

        job.state = JobState::Success;
        job.stats = Some(OptimizationStats {
            pages_scraped: 7,
            ..Default::default()
        });
        store.upsert_job(&job).await.expect("update job");

        let loaded = store.load_job(id).await.unwrap().expect("job present");
        assert_eq!(loaded.state, JobState::Success);
        assert_eq!(loaded.stats.unwrap().pages_scraped, 7);
        assert!(loaded.error.is_none());
    }

    #[tokio::test]
    async fn load_missing_job_is_none() {
        let store = test_store().await;
        assert!(store.load_job(JobId::new()).await.unwrap().is_none());
    }
}

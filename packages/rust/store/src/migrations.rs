//! SQL migration definitions for the SiteMiner database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: jobs, site_partitions, chunks, content_hashes",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Crawl job history and terminal results
CREATE TABLE IF NOT EXISTS jobs (
    id         TEXT PRIMARY KEY,
    site       TEXT NOT NULL,
    root_url   TEXT NOT NULL,
    state      TEXT NOT NULL,
    stats_json TEXT,
    error      TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_site ON jobs(site);

-- One logical partition per crawled site
CREATE TABLE IF NOT EXISTS site_partitions (
    site       TEXT PRIMARY KEY,
    pages      INTEGER NOT NULL DEFAULT 0,
    chunks     INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

-- Embedded text chunks, partitioned by site
CREATE TABLE IF NOT EXISTS chunks (
    id           TEXT PRIMARY KEY,
    site         TEXT NOT NULL,
    url          TEXT NOT NULL,
    title        TEXT,
    chunk_index  INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    text         TEXT NOT NULL,
    embedding    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_site ON chunks(site);

-- Content fingerprints, scoped per site
CREATE TABLE IF NOT EXISTS content_hashes (
    site TEXT NOT NULL,
    hash TEXT NOT NULL,
    UNIQUE(site, hash)
);

CREATE INDEX IF NOT EXISTS idx_content_hashes_site ON content_hashes(site);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

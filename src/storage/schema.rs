//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Chapter-Ingest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Catalog: works and their chapters
CREATE TABLE IF NOT EXISTS works (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Chapter ids are only unique within their work
CREATE TABLE IF NOT EXISTS chapters (
    work_id TEXT NOT NULL REFERENCES works(id),
    id TEXT NOT NULL,
    number REAL NOT NULL,
    url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (work_id, id)
);

-- Catalog: acquired page resources, written by source adapters
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work_id TEXT NOT NULL,
    chapter_id TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    url TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    FOREIGN KEY (work_id, chapter_id) REFERENCES chapters(work_id, id),
    UNIQUE(work_id, chapter_id, page_index)
);

-- Batch runs with incrementally persisted progress
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work_id TEXT,
    source TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    total INTEGER NOT NULL DEFAULT 0,
    completed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    current_unit TEXT,
    message TEXT NOT NULL DEFAULT '',
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_scope ON runs(work_id, source);

-- Acquisition job queue; rows are never deleted
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work_id TEXT NOT NULL REFERENCES works(id),
    chapter_id TEXT NOT NULL,
    locator TEXT NOT NULL,
    source TEXT NOT NULL,
    priority INTEGER NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    run_id INTEGER REFERENCES runs(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (work_id, chapter_id) REFERENCES chapters(work_id, id)
);

-- At most one active job per (work, chapter)
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_unit
    ON jobs(work_id, chapter_id)
    WHERE status IN ('pending', 'processing');

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, priority DESC, id);
CREATE INDEX IF NOT EXISTS idx_jobs_work ON jobs(work_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage and
//! Catalog traits.

use crate::state::{JobStatus, RunProgress};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Catalog, Storage, StorageError, StorageResult};
use crate::storage::{
    AcquisitionJob, ChapterRecord, JobFilter, NewJob, PageRecord, RunRecord, RunStatus,
};
use crate::IngestError;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Storage handle shared between the enqueuer, the processor and adapters
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Locks shared storage, recovering the guard if a holder panicked
///
/// Every write is a single statement or transaction, so a poisoned lock
/// never guards a half-applied change.
pub fn lock_storage(storage: &SharedStorage) -> MutexGuard<'_, SqliteStorage> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

const JOB_COLUMNS: &str = "id, work_id, chapter_id, locator, source, priority, status,
     error_message, run_id, created_at, updated_at";

const RUN_COLUMNS: &str = "id, work_id, source, config_hash, status, total, completed, failed,
     current_unit, message, started_at, updated_at, finished_at";

/// Fixed-width UTC timestamps so stored values compare correctly as text
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<AcquisitionJob> {
    Ok(AcquisitionJob {
        id: row.get(0)?,
        work_id: row.get(1)?,
        chapter_id: row.get(2)?,
        locator: row.get(3)?,
        source: row.get(4)?,
        priority: row.get(5)?,
        status: JobStatus::from_db_string(&row.get::<_, String>(6)?).unwrap_or(JobStatus::Failed),
        error_message: row.get(7)?,
        run_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        work_id: row.get(1)?,
        source: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Interrupted),
        total: row.get::<_, i64>(5)? as u64,
        completed: row.get::<_, i64>(6)? as u64,
        failed: row.get::<_, i64>(7)? as u64,
        current_unit: row.get(8)?,
        message: row.get(9)?,
        started_at: row.get(10)?,
        updated_at: row.get(11)?,
        finished_at: row.get(12)?,
    })
}

fn chapter_from_row(row: &Row<'_>) -> rusqlite::Result<ChapterRecord> {
    Ok(ChapterRecord {
        id: row.get(0)?,
        work_id: row.get(1)?,
        number: row.get(2)?,
        url: row.get(3)?,
        page_count: row.get::<_, i64>(4)? as u64,
    })
}

/// Inserts one chunk of jobs inside its own transaction
fn insert_job_chunk(conn: &mut Connection, chunk: &[NewJob]) -> rusqlite::Result<usize> {
    let now = now_timestamp();
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO jobs
             (work_id, chapter_id, locator, source, priority, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        )?;
        for job in chunk {
            inserted += stmt.execute(params![
                job.work_id,
                job.chapter_id,
                job.locator,
                job.source,
                job.priority,
                JobStatus::Pending.to_db_string(),
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(IngestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, IngestError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, IngestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Wraps this storage for sharing between tasks
    pub fn into_shared(self) -> SharedStorage {
        Arc::new(Mutex::new(self))
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Storage for SqliteStorage {
    // ===== Job Queue =====

    fn insert_jobs(&mut self, jobs: &[NewJob], batch_size: usize) -> StorageResult<usize> {
        let mut inserted = 0;

        for (batch_index, chunk) in jobs.chunks(batch_size.max(1)).enumerate() {
            match insert_job_chunk(&mut self.conn, chunk) {
                Ok(count) => inserted += count,
                Err(e) => {
                    tracing::warn!(
                        batch = batch_index,
                        size = chunk.len(),
                        error = %e,
                        "Failed to insert job batch, continuing with the rest"
                    );
                }
            }
        }

        Ok(inserted)
    }

    fn find_active_jobs(&self, work_id: &str) -> StorageResult<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT chapter_id FROM jobs WHERE work_id = ?1 AND status IN ('pending', 'processing')",
        )?;

        let chapters = stmt
            .query_map(params![work_id], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;

        Ok(chapters)
    }

    fn claim_next_batch(
        &self,
        filter: &JobFilter,
        limit: usize,
    ) -> StorageResult<Vec<AcquisitionJob>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM jobs
             WHERE status = 'pending'
               AND (?1 IS NULL OR work_id = ?1)
               AND (?2 IS NULL OR source = ?2)
               AND (?3 IS NULL OR id <= ?3)
             ORDER BY priority DESC, id ASC
             LIMIT ?4",
            JOB_COLUMNS
        ))?;

        let jobs = stmt
            .query_map(
                params![
                    filter.work_id.as_deref(),
                    filter.source.as_deref(),
                    filter.max_job_id,
                    limit as i64
                ],
                job_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    fn mark_processing(&mut self, job_id: i64, run_id: Option<i64>) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE jobs SET status = 'processing', run_id = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![job_id, run_id, now_timestamp()],
        )?;
        Ok(changed == 1)
    }

    fn mark_outcome(
        &mut self,
        job_id: i64,
        outcome: JobStatus,
        error_message: Option<&str>,
    ) -> StorageResult<bool> {
        if !outcome.is_terminal() {
            let current = self.get_job(job_id)?.status;
            return Err(StorageError::InvalidTransition {
                from: current,
                to: outcome,
            });
        }

        let allowed_from = JobStatus::predecessors(outcome)
            .iter()
            .map(|s| format!("'{}'", s.to_db_string()))
            .collect::<Vec<_>>()
            .join(", ");

        let changed = self.conn.execute(
            &format!(
                "UPDATE jobs SET status = ?2, error_message = ?3, updated_at = ?4
                 WHERE id = ?1 AND status IN ({})",
                allowed_from
            ),
            params![job_id, outcome.to_db_string(), error_message, now_timestamp()],
        )?;
        Ok(changed == 1)
    }

    fn get_job(&self, job_id: i64) -> StorageResult<AcquisitionJob> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                job_from_row,
            )
            .optional()?
            .ok_or(StorageError::JobNotFound(job_id))
    }

    fn jobs_for_work(&self, work_id: &str) -> StorageResult<Vec<AcquisitionJob>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE work_id = ?1 ORDER BY id ASC",
            JOB_COLUMNS
        ))?;

        let jobs = stmt
            .query_map(params![work_id], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    fn count_pending(&self, filter: &JobFilter) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs
             WHERE status = 'pending'
               AND (?1 IS NULL OR work_id = ?1)
               AND (?2 IS NULL OR source = ?2)
               AND (?3 IS NULL OR id <= ?3)",
            params![
                filter.work_id.as_deref(),
                filter.source.as_deref(),
                filter.max_job_id
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn max_pending_job_id(&self, filter: &JobFilter) -> StorageResult<Option<i64>> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(id) FROM jobs
             WHERE status = 'pending'
               AND (?1 IS NULL OR work_id = ?1)
               AND (?2 IS NULL OR source = ?2)",
            params![filter.work_id.as_deref(), filter.source.as_deref()],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn fail_stale_processing(&mut self, older_than: chrono::Duration) -> StorageResult<usize> {
        let cutoff = (Utc::now() - older_than).to_rfc3339_opts(SecondsFormat::Millis, true);
        let changed = self.conn.execute(
            "UPDATE jobs SET status = 'failed', error_message = 'abandoned while processing',
             updated_at = ?2
             WHERE status = 'processing' AND updated_at <= ?1",
            params![cutoff, now_timestamp()],
        )?;
        Ok(changed)
    }

    // ===== Run Management =====

    fn create_run(
        &mut self,
        work_id: Option<&str>,
        source: Option<&str>,
        config_hash: &str,
        total: u64,
    ) -> StorageResult<i64> {
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO runs (work_id, source, config_hash, status, total, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                work_id,
                source,
                config_hash,
                RunStatus::Running.to_db_string(),
                total as i64,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_run_progress(&mut self, run_id: i64, progress: &RunProgress) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET total = ?2, completed = ?3, failed = ?4, current_unit = ?5,
             message = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                run_id,
                progress.total as i64,
                progress.completed as i64,
                progress.failed as i64,
                progress.current_unit,
                progress.message,
                now_timestamp()
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        progress: &RunProgress,
    ) -> StorageResult<()> {
        let now = now_timestamp();
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?2, total = ?3, completed = ?4, failed = ?5,
             current_unit = NULL, message = ?6, updated_at = ?7, finished_at = ?7
             WHERE id = ?1",
            params![
                run_id,
                status.to_db_string(),
                progress.total as i64,
                progress.completed as i64,
                progress.failed as i64,
                progress.message,
                now
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(
        &self,
        work_id: Option<&str>,
        source: Option<&str>,
    ) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM runs WHERE work_id IS ?1 AND source IS ?2
                     ORDER BY id DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                params![work_id, source],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;

        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    fn mark_interrupted_runs(&mut self) -> StorageResult<usize> {
        let now = now_timestamp();
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, message = 'Interrupted', current_unit = NULL,
             updated_at = ?2, finished_at = ?2
             WHERE status = ?3",
            params![
                RunStatus::Interrupted.to_db_string(),
                now,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(changed)
    }

    // ===== Statistics =====

    fn count_jobs_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;

        for row in rows {
            let (status, count) = row?;
            if let Some(status) = JobStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }

        Ok(counts)
    }
}

impl Catalog for SqliteStorage {
    fn upsert_work(&mut self, work_id: &str, title: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO works (id, title, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title",
            params![work_id, title, now_timestamp()],
        )?;
        Ok(())
    }

    fn upsert_chapter(
        &mut self,
        work_id: &str,
        chapter_id: &str,
        number: f64,
        url: &str,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO chapters (work_id, id, number, url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(work_id, id) DO UPDATE
             SET number = excluded.number, url = excluded.url",
            params![work_id, chapter_id, number, url, now_timestamp()],
        )?;
        Ok(())
    }

    fn chapters_with_page_counts(&self, work_id: &str) -> StorageResult<Vec<ChapterRecord>> {
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM works WHERE id = ?1", params![work_id], |row| {
                row.get(0)
            })
            .optional()?;

        if exists.is_none() {
            return Err(StorageError::WorkNotFound(work_id.to_string()));
        }

        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.work_id, c.number, c.url, COUNT(p.id)
             FROM chapters c
             LEFT JOIN pages p ON p.work_id = c.work_id AND p.chapter_id = c.id
             WHERE c.work_id = ?1
             GROUP BY c.id
             ORDER BY c.number ASC, c.id ASC",
        )?;

        let chapters = stmt
            .query_map(params![work_id], chapter_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(chapters)
    }

    fn get_chapter(&self, work_id: &str, chapter_id: &str) -> StorageResult<ChapterRecord> {
        self.conn
            .query_row(
                "SELECT c.id, c.work_id, c.number, c.url,
                 (SELECT COUNT(*) FROM pages p WHERE p.work_id = c.work_id AND p.chapter_id = c.id)
                 FROM chapters c WHERE c.work_id = ?1 AND c.id = ?2",
                params![work_id, chapter_id],
                chapter_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::ChapterNotFound(format!("{}/{}", work_id, chapter_id)))
    }

    fn store_pages(
        &mut self,
        work_id: &str,
        chapter_id: &str,
        urls: &[String],
    ) -> StorageResult<usize> {
        // Surfaces a clean error instead of a foreign key violation
        self.get_chapter(work_id, chapter_id)?;

        let now = now_timestamp();
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM pages WHERE work_id = ?1 AND chapter_id = ?2",
            params![work_id, chapter_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pages (work_id, chapter_id, page_index, url, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (index, url) in urls.iter().enumerate() {
                stmt.execute(params![work_id, chapter_id, index as i64, url, now])?;
            }
        }
        tx.commit()?;

        Ok(urls.len())
    }

    fn pages_for_chapter(&self, work_id: &str, chapter_id: &str) -> StorageResult<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT work_id, chapter_id, page_index, url FROM pages
             WHERE work_id = ?1 AND chapter_id = ?2
             ORDER BY page_index ASC",
        )?;

        let pages = stmt
            .query_map(params![work_id, chapter_id], |row| {
                Ok(PageRecord {
                    work_id: row.get(0)?,
                    chapter_id: row.get(1)?,
                    page_index: row.get(2)?,
                    url: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pages)
    }
}

//! Storage module for persisting acquisition state
//!
//! This module handles all database operations for the pipeline, including:
//! - SQLite database initialization and schema management
//! - The acquisition job queue and its deduplication index
//! - Durable run records with incrementally persisted progress
//! - The catalog tables the source adapters write pages into

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{lock_storage, SharedStorage, SqliteStorage};
pub use traits::{Catalog, Storage, StorageError, StorageResult};

use crate::state::{JobStatus, RunProgress};
use crate::IngestError;

use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, IngestError> {
    SqliteStorage::new(path)
}

/// A job about to be inserted into the queue
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub work_id: String,
    pub chapter_id: String,
    pub locator: String,
    pub source: String,
    pub priority: i64,
}

/// Represents an acquisition job in the database
#[derive(Debug, Clone)]
pub struct AcquisitionJob {
    pub id: i64,
    pub work_id: String,
    pub chapter_id: String,
    pub locator: String,
    pub source: String,
    pub priority: i64,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub run_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Restricts which pending jobs a query sees
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub work_id: Option<String>,
    pub source: Option<String>,
    /// Ignore jobs inserted after this id
    pub max_job_id: Option<i64>,
}

/// Represents a batch run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub work_id: Option<String>,
    pub source: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub current_unit: Option<String>,
    pub message: String,
    pub started_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
}

impl RunRecord {
    /// Rebuilds the observable progress of this run
    pub fn progress(&self) -> RunProgress {
        RunProgress {
            run_id: Some(self.id),
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            current_unit: self.current_unit.clone(),
            is_running: self.status == RunStatus::Running,
            message: self.message.clone(),
        }
    }
}

/// Status of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A chapter of a work together with how many pages it holds
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRecord {
    pub id: String,
    pub work_id: String,
    pub number: f64,
    pub url: String,
    pub page_count: u64,
}

/// One stored page of a chapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub work_id: String,
    pub chapter_id: String,
    pub page_index: u32,
    pub url: String,
}

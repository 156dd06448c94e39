//! Chapter-Ingest: background acquisition of manga chapter pages
//!
//! This crate implements the acquisition pipeline that keeps a manga catalog
//! filled with page images pulled from hostile source sites: a durable job
//! queue with deduplication, a bounded-concurrency batch processor, and a
//! resilient page fetcher that falls back through rewriting proxies.

pub mod adapter;
pub mod config;
pub mod fetch;
pub mod output;
pub mod queue;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Chapter-Ingest operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Work not found: {0}")]
    WorkNotFound(String),

    #[error("Upstream read failed: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] adapter::AdapterError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// Result type alias for Chapter-Ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use queue::{
    BatchProcessor, EnqueueOutcome, EnqueueRequest, EnqueueStatus, Enqueuer, IngestService,
    ProgressReporter, RunScope, RunSummary,
};
pub use state::{FetchStatus, JobStatus, PageFetchState, RunProgress};

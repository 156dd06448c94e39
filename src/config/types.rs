use serde::Deserialize;

/// Main configuration structure for Chapter-Ingest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceEntry>,
    #[serde(default, rename = "work")]
    pub works: Vec<WorkEntry>,
}

/// Batch processor behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Number of jobs dispatched concurrently per batch
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (milliseconds)
    #[serde(rename = "batch-delay-ms", default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Upper bound for a single adapter call (seconds)
    #[serde(rename = "dispatch-timeout-secs", default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

/// Queue and enqueue behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Rows per insert transaction
    #[serde(rename = "insert-batch-size", default = "default_insert_batch_size")]
    pub insert_batch_size: usize,

    /// Priority assigned to the first missing chapter of a work
    #[serde(rename = "default-priority-base", default = "default_priority_base")]
    pub default_priority_base: i64,

    /// Source adapter used when an enqueue request names none
    #[serde(rename = "default-source", default = "default_source")]
    pub default_source: String,

    /// Age after which a job stuck in `processing` is considered abandoned
    #[serde(rename = "stale-after-minutes", default = "default_stale_after_minutes")]
    pub stale_after_minutes: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: default_insert_batch_size(),
            default_priority_base: default_priority_base(),
            default_source: default_source(),
            stale_after_minutes: default_stale_after_minutes(),
        }
    }
}

/// Page fetch fallback ladder
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Rewriting proxy prefixes tried after the direct locator, in order
    #[serde(default)]
    pub proxies: Vec<String>,

    /// Number of backoff rounds once every strategy has failed
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff (milliseconds)
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// HTTP client identification and timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// A named HTML source adapter
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    /// Name jobs refer to
    pub name: String,

    /// CSS selector matching page images in a chapter document
    #[serde(rename = "page-selector", default = "default_page_selector")]
    pub page_selector: String,

    /// Attributes checked for the image URL, first match wins
    #[serde(rename = "image-attributes", default = "default_image_attributes")]
    pub image_attributes: Vec<String>,
}

/// Catalog seed: a work and its chapters
#[derive(Debug, Clone, Deserialize)]
pub struct WorkEntry {
    pub id: String,
    pub title: String,
    #[serde(default, rename = "chapter")]
    pub chapters: Vec<ChapterEntry>,
}

/// Catalog seed: one chapter of a work
#[derive(Debug, Clone, Deserialize)]
pub struct ChapterEntry {
    pub id: String,
    pub number: f64,
    pub url: String,
}

fn default_batch_size() -> usize {
    3
}

fn default_batch_delay_ms() -> u64 {
    2000
}

fn default_dispatch_timeout_secs() -> u64 {
    120
}

fn default_insert_batch_size() -> usize {
    50
}

fn default_priority_base() -> i64 {
    1000
}

fn default_source() -> String {
    "html".to_string()
}

fn default_stale_after_minutes() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_page_selector() -> String {
    "img".to_string()
}

fn default_image_attributes() -> Vec<String> {
    vec!["data-src".to_string(), "src".to_string()]
}

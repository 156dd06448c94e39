use crate::adapter::AdapterError;
use crate::storage::AcquisitionJob;
use async_trait::async_trait;

/// Capability that acquires the pages of a single chapter
///
/// Implementations must be safe to call concurrently: the batch processor
/// dispatches up to a full batch of jobs at once, possibly for the same
/// source.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use chapter_ingest::adapter::{AdapterError, SourceAdapter};
/// use chapter_ingest::storage::AcquisitionJob;
///
/// struct Placeholder;
///
/// #[async_trait]
/// impl SourceAdapter for Placeholder {
///     fn name(&self) -> &str {
///         "placeholder"
///     }
///
///     async fn acquire(&self, job: &AcquisitionJob) -> Result<usize, AdapterError> {
///         Err(AdapterError::NoPages(job.chapter_id.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source name jobs refer to
    fn name(&self) -> &str;

    /// Acquires and stores the pages of the job's chapter
    ///
    /// # Returns
    ///
    /// The number of pages stored
    async fn acquire(&self, job: &AcquisitionJob) -> Result<usize, AdapterError>;
}

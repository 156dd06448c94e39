//! Source adapters
//!
//! A source adapter knows how to acquire the pages of one chapter from one
//! kind of upstream site. The batch processor looks adapters up by the
//! source name recorded on each job and only observes success or failure;
//! the adapter persists whatever it acquired through the catalog.
//!
//! - [`SourceAdapter`]: the capability implemented per source
//! - [`AdapterRegistry`]: name to adapter lookup used during dispatch
//! - [`HtmlChapterAdapter`]: bundled adapter that scrapes image URLs out of a
//!   chapter document with a configurable CSS selector

mod html;
mod registry;
mod traits;

pub use html::{extract_image_urls, HtmlChapterAdapter};
pub use registry::AdapterRegistry;
pub use traits::SourceAdapter;

use crate::fetch::FetchError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors a source adapter can report for one job
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("No adapter registered for source '{0}'")]
    UnknownSource(String),

    #[error("No pages found for chapter {0}")]
    NoPages(String),

    #[error("Invalid CSS selector '{0}'")]
    InvalidSelector(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Failed(String),
}

//! Fetch resilience layer
//!
//! This module retrieves remote page resources from sites that block or
//! throttle clients, including:
//! - Building HTTP clients from the `[http]` configuration
//! - An ordered list of fetch strategies (direct, then rewriting proxies)
//! - Exponential backoff rounds with cache-busting locators
//! - Manual retry that bypasses caches

mod client;
mod fetcher;
mod strategy;

pub use client::build_http_client;
pub use fetcher::{FetchedPage, PageFetcher};
pub use strategy::{cache_busted, FetchStrategy};

use thiserror::Error;

/// Errors that can occur while fetching a page resource
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("All strategies exhausted for {locator} after {attempts} attempts: {last_error}")]
    Exhausted {
        locator: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Resource {0} is in the error state; a manual retry is required")]
    RetryRequired(String),

    #[error("Invalid locator {locator}: {source}")]
    InvalidLocator {
        locator: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

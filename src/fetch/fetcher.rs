use crate::config::{FetchConfig, HttpConfig};
use crate::fetch::client::build_http_client;
use crate::fetch::strategy::{cache_busted, FetchStrategy};
use crate::fetch::FetchError;
use crate::state::{FetchStatus, NextStep, PageFetchState};
use chrono::Utc;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// A successfully fetched page resource
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Locator as requested by the caller
    pub locator: String,

    /// URL after redirects of the attempt that succeeded
    pub final_url: String,

    pub status_code: u16,

    /// Raw response bytes; page images are binary
    pub body: Vec<u8>,

    /// Strategy that succeeded
    pub strategy: FetchStrategy,

    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Fetches page resources through the strategy ladder
///
/// # Fetch Flow
///
/// | Condition | Action |
/// |-----------|--------|
/// | Success (2xx, non-empty body) | `loaded` |
/// | Failure, more strategies | Next strategy right away |
/// | Failure, strategies exhausted, retries left | Sleep `2^round × base`, restart at direct with `_retry=<round>` |
/// | Failure, no retries left | `error` |
///
/// Failure means a network error, a non-2xx status, or an empty body.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    strategies: Vec<FetchStrategy>,
    max_retries: u32,
    backoff_base: Duration,
}

impl FetchedPage {
    /// Body decoded as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl PageFetcher {
    /// Creates a fetcher over an existing client
    pub fn new(client: Client, config: &FetchConfig) -> Self {
        Self {
            client,
            strategies: FetchStrategy::ladder(&config.proxies),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Builds the HTTP client and the fetcher from configuration
    pub fn from_config(http: &HttpConfig, fetch: &FetchConfig) -> Result<Self, FetchError> {
        let client = build_http_client(http)?;
        Ok(Self::new(client, fetch))
    }

    /// Number of strategies, the direct one included
    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Fetches a resource from a fresh state
    pub async fn fetch(&self, locator: &str) -> Result<FetchedPage, FetchError> {
        let mut state = PageFetchState::new();
        self.drive(&mut state, locator).await
    }

    /// User-initiated retry of a resource, typically one in the error state
    ///
    /// Resets every counter and forces a fresh, uncached attempt.
    pub async fn retry(
        &self,
        state: &mut PageFetchState,
        locator: &str,
    ) -> Result<FetchedPage, FetchError> {
        state.manual_retry();
        self.drive(state, locator).await
    }

    /// Walks the strategy ladder from the position recorded in `state`
    ///
    /// Returns once the resource loads or every strategy has failed in
    /// every retry round. `state` reflects the final position either way.
    pub async fn drive(
        &self,
        state: &mut PageFetchState,
        locator: &str,
    ) -> Result<FetchedPage, FetchError> {
        if state.status == FetchStatus::Error {
            return Err(FetchError::RetryRequired(locator.to_string()));
        }

        if let Err(source) = Url::parse(locator) {
            state.status = FetchStatus::Error;
            return Err(FetchError::InvalidLocator {
                locator: locator.to_string(),
                source,
            });
        }

        // One stamp per manual retry so every attempt of it shares the bypass key
        let bypass_stamp = state
            .bypass_cache
            .then(|| Utc::now().timestamp_millis().to_string());

        let mut attempts = 0u32;
        loop {
            let strategy = &self.strategies[state.proxy_index.min(self.strategies.len() - 1)];
            let target = self.target_for(state, locator, bypass_stamp.as_deref())?;
            attempts += 1;

            match self.attempt(&target, state.bypass_cache).await {
                Ok((final_url, status_code, body)) => {
                    state.on_success();
                    tracing::debug!(
                        locator = %locator,
                        strategy = %strategy,
                        attempts,
                        "Fetched page resource"
                    );
                    return Ok(FetchedPage {
                        locator: locator.to_string(),
                        final_url,
                        status_code,
                        body,
                        strategy: strategy.clone(),
                        attempts,
                    });
                }
                Err(reason) => {
                    tracing::debug!(
                        locator = %locator,
                        strategy = %strategy,
                        retry = state.retry_count,
                        error = %reason,
                        "Fetch attempt failed"
                    );

                    match state.on_failure(self.strategies.len(), self.max_retries, self.backoff_base)
                    {
                        NextStep::NextStrategy => continue,
                        NextStep::Backoff(delay) => tokio::time::sleep(delay).await,
                        NextStep::GiveUp => {
                            tracing::warn!(
                                locator = %locator,
                                attempts,
                                error = %reason,
                                "Page resource unavailable, every strategy failed"
                            );
                            return Err(FetchError::Exhausted {
                                locator: locator.to_string(),
                                attempts,
                                last_error: reason,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Builds the URL of the next attempt
    fn target_for(
        &self,
        state: &PageFetchState,
        locator: &str,
        bypass_stamp: Option<&str>,
    ) -> Result<String, FetchError> {
        let invalid = |source| FetchError::InvalidLocator {
            locator: locator.to_string(),
            source,
        };

        let mut busted = locator.to_string();
        if state.retry_count > 0 {
            busted = cache_busted(&busted, "_retry", &state.retry_count.to_string())
                .map_err(invalid)?;
        }
        if let Some(stamp) = bypass_stamp {
            busted = cache_busted(&busted, "_t", stamp).map_err(invalid)?;
        }

        let strategy = &self.strategies[state.proxy_index.min(self.strategies.len() - 1)];
        Ok(strategy.rewrite(&busted))
    }

    /// Performs one request, mapping every failure to a description
    async fn attempt(
        &self,
        url: &str,
        bypass_cache: bool,
    ) -> Result<(String, u16, Vec<u8>), String> {
        let mut request = self.client.get(url);
        if bypass_cache {
            request = request.header(CACHE_CONTROL, "no-cache");
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                "Request timeout".to_string()
            } else if e.is_connect() {
                "Connection refused".to_string()
            } else {
                e.to_string()
            }
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| e.to_string())?;
        if body.is_empty() {
            return Err("Empty body".to_string());
        }

        Ok((final_url, status.as_u16(), body.to_vec()))
    }
}

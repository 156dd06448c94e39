use std::fmt;
use std::time::Duration;

/// Display status of a single page resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    Loading,
    Loaded,
    Error,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// What the fetcher should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Try the next strategy right away
    NextStrategy,
    /// Sleep, then start over at the direct strategy
    Backoff(Duration),
    /// Every strategy failed in every round
    GiveUp,
}

/// Fetch ladder position for one page resource
///
/// `status` only becomes `Error` once every strategy has failed in every
/// retry round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFetchState {
    pub status: FetchStatus,

    /// Index into the strategy list, 0 is the direct locator
    pub proxy_index: usize,

    /// Completed backoff rounds, 0..=max_retries
    pub retry_count: u32,

    /// Set by a manual retry; the next attempts must bypass caches
    pub bypass_cache: bool,
}

impl Default for PageFetchState {
    fn default() -> Self {
        Self::new()
    }
}

impl PageFetchState {
    pub fn new() -> Self {
        Self {
            status: FetchStatus::Loading,
            proxy_index: 0,
            retry_count: 0,
            bypass_cache: false,
        }
    }

    /// Advances the ladder after a failed attempt
    ///
    /// # Arguments
    ///
    /// * `strategy_count` - Number of strategies (direct plus proxies)
    /// * `max_retries` - Number of backoff rounds allowed
    /// * `backoff_base` - Delay of the first backoff round
    pub fn on_failure(
        &mut self,
        strategy_count: usize,
        max_retries: u32,
        backoff_base: Duration,
    ) -> NextStep {
        if self.proxy_index + 1 < strategy_count {
            self.proxy_index += 1;
            return NextStep::NextStrategy;
        }

        if self.retry_count < max_retries {
            let delay = backoff_delay(backoff_base, self.retry_count);
            self.retry_count += 1;
            self.proxy_index = 0;
            return NextStep::Backoff(delay);
        }

        self.status = FetchStatus::Error;
        NextStep::GiveUp
    }

    /// Marks the resource as loaded
    pub fn on_success(&mut self) {
        self.status = FetchStatus::Loaded;
    }

    /// Resets every counter for a user-initiated retry
    pub fn manual_retry(&mut self) {
        self.status = FetchStatus::Loading;
        self.proxy_index = 0;
        self.retry_count = 0;
        self.bypass_cache = true;
    }
}

/// Delay of a backoff round: `2^round × base`
pub fn backoff_delay(base: Duration, round: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(round))
}

/// Worst-case total sleep before a resource reaches `Error`
pub fn total_backoff(base: Duration, max_retries: u32) -> Duration {
    (0..max_retries).map(|round| backoff_delay(base, round)).sum()
}

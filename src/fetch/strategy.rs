use std::fmt;
use url::{form_urlencoded, Url};

/// One way of reaching a remote resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Request the locator as-is
    Direct,

    /// Request through a rewriting proxy; the percent-encoded locator is
    /// appended to `prefix`
    Proxy { prefix: String },
}

impl FetchStrategy {
    /// Builds the strategy ladder: direct first, then each proxy in order
    pub fn ladder(proxies: &[String]) -> Vec<FetchStrategy> {
        std::iter::once(FetchStrategy::Direct)
            .chain(proxies.iter().map(|prefix| FetchStrategy::Proxy {
                prefix: prefix.clone(),
            }))
            .collect()
    }

    /// Rewrites a locator for this strategy
    pub fn rewrite(&self, locator: &str) -> String {
        match self {
            Self::Direct => locator.to_string(),
            Self::Proxy { prefix } => {
                let encoded: String = form_urlencoded::byte_serialize(locator.as_bytes()).collect();
                format!("{}{}", prefix, encoded)
            }
        }
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Proxy { prefix } => write!(f, "proxy {}", prefix),
        }
    }
}

/// Appends a cache-busting query parameter to a locator
///
/// Existing query parameters are kept.
pub fn cache_busted(locator: &str, key: &str, value: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(locator)?;
    url.query_pairs_mut().append_pair(key, value);
    Ok(url.to_string())
}

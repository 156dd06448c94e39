//! Integration tests for the fetch resilience layer
//!
//! These tests use wiremock to stand in for hostile upstream hosts and
//! rewriting proxies.

use chapter_ingest::config::{FetchConfig, HttpConfig};
use chapter_ingest::fetch::{FetchError, FetchStrategy, PageFetcher};
use chapter_ingest::state::{FetchStatus, PageFetchState};
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Matches requests carrying the given query parameter, whatever its value
struct HasQueryKey(&'static str);

impl Match for HasQueryKey {
    fn matches(&self, request: &Request) -> bool {
        request.url.query_pairs().any(|(key, _)| key == self.0)
    }
}

fn fetcher(proxies: Vec<String>, max_retries: u32) -> PageFetcher {
    let http = HttpConfig {
        request_timeout_secs: 5,
        connect_timeout_secs: 5,
        ..HttpConfig::default()
    };
    let fetch = FetchConfig {
        proxies,
        max_retries,
        backoff_base_ms: 5,
    };
    PageFetcher::from_config(&http, &fetch).expect("client builds")
}

#[tokio::test]
async fn test_direct_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page/1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_string("image-bytes"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher(vec![], 3);
    let page = fetcher
        .fetch(&format!("{}/page/1.jpg", server.uri()))
        .await
        .unwrap();

    assert_eq!(page.body, b"image-bytes");
    assert_eq!(page.attempts, 1);
    assert_eq!(page.strategy, FetchStrategy::Direct);
}

#[tokio::test]
async fn test_binary_body_is_preserved() {
    let server = MockServer::start().await;
    let image: Vec<u8> = vec![137, 80, 78, 71, 13, 10, 26, 10, 255, 216, 0, 156];
    Mock::given(method("GET"))
        .and(path("/page/2.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(image.clone())
                .insert_header("content-type", "image/png"),
        )
        .mount(&server)
        .await;

    let page = fetcher(vec![], 0)
        .fetch(&format!("{}/page/2.png", server.uri()))
        .await
        .unwrap();

    assert_eq!(page.body, image);
}

#[tokio::test]
async fn test_falls_back_to_proxy() {
    let server = MockServer::start().await;
    let locator = format!("{}/hotlinked.jpg", server.uri());

    Mock::given(method("GET"))
        .and(path("/hotlinked.jpg"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/proxy"))
        .and(query_param("url", locator.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("via-proxy"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = format!("{}/proxy?url=", server.uri());
    let fetcher = fetcher(vec![proxy.clone()], 3);
    let mut state = PageFetchState::new();

    let page = fetcher.drive(&mut state, &locator).await.unwrap();

    assert_eq!(page.body, b"via-proxy");
    assert_eq!(page.attempts, 2);
    assert_eq!(page.strategy, FetchStrategy::Proxy { prefix: proxy });
    assert_eq!(state.status, FetchStatus::Loaded);
    assert_eq!(state.proxy_index, 1);
    assert_eq!(state.retry_count, 0);
}

#[tokio::test]
async fn test_exhaustion_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = fetcher(vec![format!("{}/proxy?url=", server.uri())], 2);
    let mut state = PageFetchState::new();
    let started = Instant::now();

    let result = fetcher
        .drive(&mut state, &format!("{}/broken.jpg", server.uri()))
        .await;

    // 2 strategies in each of 3 rounds, with 5ms + 10ms of backoff
    assert!(matches!(result, Err(FetchError::Exhausted { attempts: 6, .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(state.status, FetchStatus::Error);
    assert_eq!(state.retry_count, 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 6);

    let direct_retries: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path() == "/broken.jpg")
        .map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "_retry")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        })
        .collect();
    assert_eq!(direct_retries, vec!["", "1", "2"]);
}

#[tokio::test]
async fn test_empty_body_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty.jpg"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let fetcher = fetcher(vec![], 0);
    let result = fetcher.fetch(&format!("{}/empty.jpg", server.uri())).await;

    match result {
        Err(FetchError::Exhausted {
            attempts,
            last_error,
            ..
        }) => {
            assert_eq!(attempts, 1);
            assert_eq!(last_error, "Empty body");
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_manual_retry_bypasses_cache() {
    let server = MockServer::start().await;
    let locator = format!("{}/flaky.jpg", server.uri());

    Mock::given(method("GET"))
        .and(path("/flaky.jpg"))
        .and(HasQueryKey("_t"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky.jpg"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let fetcher = fetcher(vec![], 1);
    let mut state = PageFetchState::new();

    assert!(fetcher.drive(&mut state, &locator).await.is_err());
    assert_eq!(state.status, FetchStatus::Error);

    // Driving an errored resource again needs an explicit retry
    assert!(matches!(
        fetcher.drive(&mut state, &locator).await,
        Err(FetchError::RetryRequired(_))
    ));

    let page = fetcher.retry(&mut state, &locator).await.unwrap();
    assert_eq!(page.body, b"fresh");
    assert_eq!(state.status, FetchStatus::Loaded);
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.proxy_index, 0);
    assert!(state.bypass_cache);
}

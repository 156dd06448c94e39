//! Integration tests for the acquisition pipeline
//!
//! These tests drive the enqueuer, the batch processor and the run service
//! together over a real SQLite database, with scripted source adapters or a
//! wiremock-backed chapter site.

use async_trait::async_trait;
use chapter_ingest::adapter::{AdapterError, AdapterRegistry, HtmlChapterAdapter, SourceAdapter};
use chapter_ingest::config::{FetchConfig, HttpConfig, QueueConfig, SourceEntry};
use chapter_ingest::fetch::PageFetcher;
use chapter_ingest::queue::{ProcessorSettings, RunOutcome};
use chapter_ingest::storage::{
    lock_storage, open_storage, AcquisitionJob, Catalog, JobFilter, NewJob, RunStatus,
    SharedStorage, SqliteStorage, Storage,
};
use chapter_ingest::{
    BatchProcessor, EnqueueRequest, EnqueueStatus, Enqueuer, IngestService, JobStatus,
    ProgressReporter, RunScope,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Adapter that stores one page per chapter unless told to fail it
struct ScriptedAdapter {
    storage: SharedStorage,
    fail: Vec<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    fn new(storage: &SharedStorage, fail: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            storage: storage.clone(),
            fail: fail.iter().map(|s| s.to_string()).collect(),
            delay: Duration::from_millis(10),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
        })
    }

    fn dispatched(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "html"
    }

    async fn acquire(&self, job: &AcquisitionJob) -> Result<usize, AdapterError> {
        self.order.lock().unwrap().push(job.chapter_id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(&job.chapter_id) {
            return Err(AdapterError::Failed("source refused".to_string()));
        }

        let pages = vec![format!("{}/page-1.jpg", job.locator)];
        Ok(lock_storage(&self.storage).store_pages(&job.work_id, &job.chapter_id, &pages)?)
    }
}

fn catalog_with_chapters(count: usize) -> SharedStorage {
    let mut storage = SqliteStorage::new_in_memory().unwrap();
    storage.upsert_work("w1", "Work One").unwrap();
    for i in 1..=count {
        storage
            .upsert_chapter(
                "w1",
                &format!("c{:02}", i),
                i as f64,
                &format!("https://manga.example.com/w1/{}", i),
            )
            .unwrap();
    }
    storage.into_shared()
}

fn settings(batch_delay: Duration) -> ProcessorSettings {
    ProcessorSettings {
        batch_size: 3,
        batch_delay,
        dispatch_timeout: Duration::from_secs(5),
        config_hash: "test-hash".to_string(),
    }
}

fn processor_with(
    storage: &SharedStorage,
    adapter: Arc<dyn SourceAdapter>,
    batch_delay: Duration,
) -> BatchProcessor {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    BatchProcessor::new(
        storage.clone(),
        Arc::new(registry),
        ProgressReporter::new(storage.clone()),
        settings(batch_delay),
    )
}

#[tokio::test]
async fn test_ten_chapters_two_failures() {
    let storage = catalog_with_chapters(10);
    let enqueuer = Enqueuer::new(storage.clone(), &QueueConfig::default());

    let outcome = enqueuer.enqueue(&EnqueueRequest::new("w1")).unwrap();
    assert_eq!(outcome.queued, 10);
    assert_eq!(outcome.candidates, 10);
    assert_eq!(outcome.status, EnqueueStatus::Queued);

    let adapter = ScriptedAdapter::new(&storage, &["c03", "c07"]);
    let processor = processor_with(&storage, adapter.clone(), Duration::from_millis(1));

    let summary = processor
        .run(&RunScope::work("w1"), CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.batches, vec![3, 3, 3, 1]);
    assert_eq!(summary.completed, 8);
    assert_eq!(summary.failed, 2);
    assert!(adapter.max_in_flight.load(Ordering::SeqCst) <= 3);

    // Dispatch follows priority, which follows chapter order
    let expected: Vec<String> = (1..=10).map(|i| format!("c{:02}", i)).collect();
    let mut dispatched = adapter.dispatched();
    for batch in dispatched.chunks_mut(3) {
        batch.sort();
    }
    assert_eq!(dispatched, expected);

    let progress = processor.reporter().current(&RunScope::work("w1"));
    assert!(!progress.is_running);
    assert_eq!(progress.percent(), 100);
    assert_eq!(progress.completed + progress.failed, progress.total);
}

#[tokio::test]
async fn test_partial_catalog_queues_only_missing() {
    let storage = catalog_with_chapters(10);
    {
        let mut s = lock_storage(&storage);
        for id in ["c01", "c02", "c03", "c04"] {
            s.store_pages("w1", id, &["https://img.example.com/p.jpg".to_string()])
                .unwrap();
        }
        let pending: Vec<NewJob> = ["c05", "c06"]
            .iter()
            .map(|id| NewJob {
                work_id: "w1".to_string(),
                chapter_id: id.to_string(),
                locator: format!("https://manga.example.com/w1/{}", id),
                source: "html".to_string(),
                priority: 500,
            })
            .collect();
        s.insert_jobs(&pending, 50).unwrap();
    }

    let enqueuer = Enqueuer::new(storage.clone(), &QueueConfig::default());
    let outcome = enqueuer
        .enqueue(&EnqueueRequest::new("w1").with_priority_base(2000))
        .unwrap();
    assert_eq!(outcome.queued, 4);

    let jobs = lock_storage(&storage).jobs_for_work("w1").unwrap();
    let new_priorities: Vec<(String, i64)> = jobs
        .iter()
        .filter(|j| j.priority > 500)
        .map(|j| (j.chapter_id.clone(), j.priority))
        .collect();
    assert_eq!(
        new_priorities,
        vec![
            ("c07".to_string(), 2000),
            ("c08".to_string(), 1999),
            ("c09".to_string(), 1998),
            ("c10".to_string(), 1997),
        ]
    );
}

#[tokio::test]
async fn test_at_most_one_active_job_per_chapter() {
    let storage = catalog_with_chapters(6);
    let enqueuer = Enqueuer::new(storage.clone(), &QueueConfig::default());

    for _ in 0..3 {
        enqueuer.enqueue(&EnqueueRequest::new("w1")).unwrap();
    }

    let jobs = lock_storage(&storage).jobs_for_work("w1").unwrap();
    let active: Vec<_> = jobs.iter().filter(|j| j.status.is_active()).collect();
    assert_eq!(active.len(), 6);

    let chapters: HashSet<_> = active.iter().map(|j| j.chapter_id.as_str()).collect();
    assert_eq!(chapters.len(), 6);
}

#[tokio::test]
async fn test_failed_chapters_are_requeued() {
    let storage = catalog_with_chapters(3);
    let enqueuer = Enqueuer::new(storage.clone(), &QueueConfig::default());
    enqueuer.enqueue(&EnqueueRequest::new("w1")).unwrap();

    let adapter = ScriptedAdapter::new(&storage, &["c02"]);
    let processor = processor_with(&storage, adapter, Duration::from_millis(1));
    processor
        .run(&RunScope::all(), CancellationToken::new(), None)
        .await
        .unwrap();

    let outcome = enqueuer.enqueue(&EnqueueRequest::new("w1")).unwrap();
    assert_eq!(outcome.queued, 1);

    let jobs = lock_storage(&storage).jobs_for_work("w1").unwrap();
    let c02: Vec<JobStatus> = jobs
        .iter()
        .filter(|j| j.chapter_id == "c02")
        .map(|j| j.status)
        .collect();
    assert_eq!(c02, vec![JobStatus::Failed, JobStatus::Pending]);
}

/// Adapter that queues one more chapter the first time it is called
struct EnqueuingAdapter {
    storage: SharedStorage,
    fired: AtomicBool,
}

#[async_trait]
impl SourceAdapter for EnqueuingAdapter {
    fn name(&self) -> &str {
        "html"
    }

    async fn acquire(&self, job: &AcquisitionJob) -> Result<usize, AdapterError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let late = NewJob {
                work_id: "w1".to_string(),
                chapter_id: "c04".to_string(),
                locator: "https://manga.example.com/w1/4".to_string(),
                source: "html".to_string(),
                priority: 10_000,
            };
            lock_storage(&self.storage).insert_jobs(&[late], 50)?;
        }
        let pages = ["p".to_string()];
        Ok(lock_storage(&self.storage).store_pages(&job.work_id, &job.chapter_id, &pages)?)
    }
}

#[tokio::test]
async fn test_jobs_queued_mid_run_do_not_break_counters() {
    let storage = catalog_with_chapters(4);
    {
        let mut s = lock_storage(&storage);
        let jobs: Vec<NewJob> = ["c01", "c02", "c03"]
            .iter()
            .map(|id| NewJob {
                work_id: "w1".to_string(),
                chapter_id: id.to_string(),
                locator: "https://manga.example.com".to_string(),
                source: "html".to_string(),
                priority: 1,
            })
            .collect();
        s.insert_jobs(&jobs, 50).unwrap();
    }

    let adapter = Arc::new(EnqueuingAdapter {
        storage: storage.clone(),
        fired: AtomicBool::new(false),
    });
    let mut settings = settings(Duration::from_millis(1));
    settings.batch_size = 1;
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    let processor = BatchProcessor::new(
        storage.clone(),
        Arc::new(registry),
        ProgressReporter::new(storage.clone()),
        settings,
    );

    let summary = processor
        .run(&RunScope::all(), CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.batches, vec![1, 1, 1]);

    // The late job waits for the next run
    let pending = lock_storage(&storage)
        .count_pending(&JobFilter::default())
        .unwrap();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn test_enqueue_triggers_background_run() {
    let storage = catalog_with_chapters(5);
    let adapter = ScriptedAdapter::new(&storage, &[]);
    let service = IngestService::new(processor_with(
        &storage,
        adapter.clone(),
        Duration::from_millis(1),
    ));

    let (trigger, requests) = tokio::sync::mpsc::unbounded_channel();
    let worker = service.spawn_trigger_worker(requests);
    let enqueuer = Enqueuer::new(storage.clone(), &QueueConfig::default()).with_trigger(trigger);

    let outcome = enqueuer.enqueue(&EnqueueRequest::new("w1")).unwrap();
    assert_eq!(outcome.queued, 5);

    drop(enqueuer);
    worker.await.unwrap();
    service.wait_idle().await;

    assert_eq!(adapter.dispatched().len(), 5);

    // Every chapter now has pages
    let again = Enqueuer::new(storage.clone(), &QueueConfig::default())
        .enqueue(&EnqueueRequest::new("w1"))
        .unwrap();
    assert_eq!(again.status, EnqueueStatus::AlreadyComplete);

    let run = lock_storage(&storage)
        .latest_run(Some("w1"), None)
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.completed, 5);
}

#[tokio::test]
async fn test_stop_finishes_current_batch_only() {
    let storage = catalog_with_chapters(7);
    Enqueuer::new(storage.clone(), &QueueConfig::default())
        .enqueue(&EnqueueRequest::new("w1"))
        .unwrap();

    let adapter = ScriptedAdapter::new(&storage, &[]);
    let service = IngestService::new(processor_with(
        &storage,
        adapter.clone(),
        Duration::from_secs(60),
    ));
    let scope = RunScope::work("w1");

    let mut progress = service.reporter().subscribe(&scope);
    assert!(service.start(scope.clone()));
    while progress.borrow_and_update().processed() < 3 {
        progress.changed().await.unwrap();
    }

    service.stop_all();
    service.wait_idle().await;

    assert_eq!(adapter.dispatched().len(), 3);
    let pending = lock_storage(&storage)
        .count_pending(&scope.filter())
        .unwrap();
    assert_eq!(pending, 4);

    let run = lock_storage(&storage)
        .latest_run(Some("w1"), None)
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Stopped);
    assert_eq!(run.completed, 3);
}

#[tokio::test]
async fn test_html_adapter_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/read/w1/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <div class="reader">
                    <img class="page" data-src="/img/w1/1/01.jpg" src="/spinner.gif">
                    <img class="page" data-src="/img/w1/1/02.jpg" src="/spinner.gif">
                </div>
                <img class="ad" src="/ad.png">
            </body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/read/w1/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(&server)
        .await;

    let mut storage = SqliteStorage::new_in_memory().unwrap();
    storage.upsert_work("w1", "Work One").unwrap();
    storage
        .upsert_chapter("w1", "c1", 1.0, &format!("{}/read/w1/1", server.uri()))
        .unwrap();
    storage
        .upsert_chapter("w1", "c2", 2.0, &format!("{}/read/w1/2", server.uri()))
        .unwrap();
    let storage = storage.into_shared();

    let source = SourceEntry {
        name: "html".to_string(),
        page_selector: "img.page".to_string(),
        image_attributes: vec!["data-src".to_string(), "src".to_string()],
    };
    let fetch = FetchConfig {
        proxies: vec![],
        max_retries: 0,
        backoff_base_ms: 1,
    };
    let fetcher = PageFetcher::from_config(&HttpConfig::default(), &fetch).unwrap();
    let adapter = Arc::new(HtmlChapterAdapter::new(&source, fetcher, storage.clone()).unwrap());

    Enqueuer::new(storage.clone(), &QueueConfig::default())
        .enqueue(&EnqueueRequest::new("w1"))
        .unwrap();
    let summary = processor_with(&storage, adapter, Duration::from_millis(1))
        .run(&RunScope::all(), CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let pages = lock_storage(&storage).pages_for_chapter("w1", "c1").unwrap();
    let urls: Vec<_> = pages.iter().map(|p| p.url.clone()).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/img/w1/1/01.jpg", server.uri()),
            format!("{}/img/w1/1/02.jpg", server.uri()),
        ]
    );

    let jobs = lock_storage(&storage).jobs_for_work("w1").unwrap();
    let c2 = jobs.iter().find(|j| j.chapter_id == "c2").unwrap();
    assert_eq!(c2.status, JobStatus::Failed);
    assert!(c2
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("No pages found"));
}

#[tokio::test]
async fn test_run_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ingest.db");

    {
        let mut storage = open_storage(&db_path).unwrap();
        storage.upsert_work("w1", "Work One").unwrap();
        storage
            .upsert_chapter("w1", "c1", 1.0, "https://manga.example.com/w1/1")
            .unwrap();
        let storage = storage.into_shared();

        Enqueuer::new(storage.clone(), &QueueConfig::default())
            .enqueue(&EnqueueRequest::new("w1"))
            .unwrap();
        let adapter = ScriptedAdapter::new(&storage, &[]);
        processor_with(&storage, adapter, Duration::from_millis(1))
            .run(&RunScope::all(), CancellationToken::new(), None)
            .await
            .unwrap();
    }

    let storage = open_storage(&db_path).unwrap();
    let runs = storage.recent_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].config_hash, "test-hash");
    assert_eq!(storage.pages_for_chapter("w1", "c1").unwrap().len(), 1);
}

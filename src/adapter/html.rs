use crate::adapter::{AdapterError, SourceAdapter};
use crate::config::SourceEntry;
use crate::fetch::PageFetcher;
use crate::storage::{lock_storage, AcquisitionJob, Catalog, SharedStorage};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Adapter for sources that serve each chapter as one HTML document
///
/// The chapter document is fetched through the fetch resilience layer and
/// every element matching `page_selector` contributes one page URL, taken
/// from the first non-empty attribute in `image_attributes`.
pub struct HtmlChapterAdapter {
    name: String,
    selector: Selector,
    attributes: Vec<String>,
    fetcher: PageFetcher,
    storage: SharedStorage,
}

impl HtmlChapterAdapter {
    pub fn new(
        source: &SourceEntry,
        fetcher: PageFetcher,
        storage: SharedStorage,
    ) -> Result<Self, AdapterError> {
        let selector = Selector::parse(&source.page_selector)
            .map_err(|_| AdapterError::InvalidSelector(source.page_selector.clone()))?;

        Ok(Self {
            name: source.name.clone(),
            selector,
            attributes: source.image_attributes.clone(),
            fetcher,
            storage,
        })
    }
}

#[async_trait]
impl SourceAdapter for HtmlChapterAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, job: &AcquisitionJob) -> Result<usize, AdapterError> {
        let page = self.fetcher.fetch(&job.locator).await?;

        // Relative sources resolve against the chapter locator, not a proxy URL
        let base = Url::parse(&job.locator)
            .map_err(|e| AdapterError::Failed(format!("Invalid locator {}: {}", job.locator, e)))?;
        let urls = extract_image_urls(&page.text(), &base, &self.selector, &self.attributes);

        if urls.is_empty() {
            return Err(AdapterError::NoPages(job.chapter_id.clone()));
        }

        let stored =
            lock_storage(&self.storage).store_pages(&job.work_id, &job.chapter_id, &urls)?;

        tracing::debug!(
            job_id = job.id,
            chapter = %job.chapter_id,
            pages = stored,
            "Stored chapter pages"
        );

        Ok(stored)
    }
}

/// Extracts page image URLs from a chapter document, in document order
///
/// Duplicates, data URIs and non-HTTP(S) URLs are skipped.
pub fn extract_image_urls(
    html: &str,
    base_url: &Url,
    selector: &Selector,
    attributes: &[String],
) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for element in document.select(selector) {
        let value = attributes
            .iter()
            .filter_map(|attr| element.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty());

        if let Some(absolute) = value.and_then(|v| resolve_image(v, base_url)) {
            if seen.insert(absolute.clone()) {
                urls.push(absolute);
            }
        }
    }

    urls
}

fn resolve_image(src: &str, base_url: &Url) -> Option<String> {
    if src.starts_with("data:") {
        return None;
    }

    let absolute = base_url.join(src).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_url() -> Url {
        Url::parse("https://example.com/read/work/ch-1").unwrap()
    }

    fn attrs() -> Vec<String> {
        vec!["data-src".to_string(), "src".to_string()]
    }

    #[test]
    fn test_extracts_in_document_order() {
        let html = r#"<html><body>
            <img class="page" src="/img/1.jpg">
            <img class="page" src="2.jpg">
            <img class="page" src="https://cdn.example.com/3.jpg">
        </body></html>"#;
        let selector = Selector::parse("img.page").unwrap();

        let urls = extract_image_urls(html, &base_url(), &selector, &attrs());
        assert_eq!(
            urls,
            vec![
                "https://example.com/img/1.jpg",
                "https://example.com/read/work/2.jpg",
                "https://cdn.example.com/3.jpg",
            ]
        );
    }

    #[test]
    fn test_prefers_lazy_attribute() {
        let html = r#"<img data-src="/real.jpg" src="/placeholder.gif">
                      <img data-src="" src="/fallback.jpg">"#;
        let selector = Selector::parse("img").unwrap();

        let urls = extract_image_urls(html, &base_url(), &selector, &attrs());
        assert_eq!(
            urls,
            vec![
                "https://example.com/real.jpg",
                "https://example.com/fallback.jpg"
            ]
        );
    }

    #[test]
    fn test_skips_data_uris_and_duplicates() {
        let html = r#"<img src="data:image/gif;base64,AAAA">
                      <img src="/a.jpg"><img src="/a.jpg">
                      <img src="javascript:void(0)">"#;
        let selector = Selector::parse("img").unwrap();

        let urls = extract_image_urls(html, &base_url(), &selector, &attrs());
        assert_eq!(urls, vec!["https://example.com/a.jpg"]);
    }

    #[test]
    fn test_selector_matches_nothing() {
        let html = r#"<p>No images here</p>"#;
        let selector = Selector::parse("img").unwrap();

        assert!(extract_image_urls(html, &base_url(), &selector, &attrs()).is_empty());
    }
}

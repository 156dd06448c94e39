use crate::config::types::{
    Config, FetchConfig, OutputConfig, ProcessorConfig, QueueConfig, SourceEntry, WorkEntry,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_processor_config(&config.processor)?;
    validate_queue_config(&config.queue, &config.sources)?;
    validate_fetch_config(&config.fetch)?;
    validate_output_config(&config.output)?;
    validate_sources(&config.sources)?;
    validate_works(&config.works)?;
    Ok(())
}

/// Validates batch processor configuration
fn validate_processor_config(config: &ProcessorConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 || config.batch_size > 50 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be between 1 and 50, got {}",
            config.batch_size
        )));
    }

    if config.dispatch_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "dispatch_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates queue configuration against the configured sources
fn validate_queue_config(config: &QueueConfig, sources: &[SourceEntry]) -> Result<(), ConfigError> {
    if config.insert_batch_size < 1 || config.insert_batch_size > 500 {
        return Err(ConfigError::Validation(format!(
            "insert_batch_size must be between 1 and 500, got {}",
            config.insert_batch_size
        )));
    }

    if config.default_source.is_empty() {
        return Err(ConfigError::Validation(
            "default_source cannot be empty".to_string(),
        ));
    }

    if !sources.is_empty() && !sources.iter().any(|s| s.name == config.default_source) {
        return Err(ConfigError::Validation(format!(
            "default_source '{}' does not name a configured source",
            config.default_source
        )));
    }

    Ok(())
}

/// Validates the proxy chain and backoff settings
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    for proxy in &config.proxies {
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Proxy '{}' must use http or https",
                proxy
            )));
        }
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates source adapter entries
fn validate_sources(sources: &[SourceEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for source in sources {
        if source.name.is_empty() {
            return Err(ConfigError::Validation(
                "source name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }

        Selector::parse(&source.page_selector).map_err(|e| {
            ConfigError::InvalidSelector(format!("'{}': {:?}", source.page_selector, e))
        })?;

        if source.image_attributes.is_empty() {
            return Err(ConfigError::Validation(format!(
                "source '{}' must list at least one image attribute",
                source.name
            )));
        }
    }

    Ok(())
}

/// Validates catalog seed entries
fn validate_works(works: &[WorkEntry]) -> Result<(), ConfigError> {
    let mut work_ids = HashSet::new();

    for work in works {
        if work.id.is_empty() {
            return Err(ConfigError::Validation("work id cannot be empty".to_string()));
        }

        if !work_ids.insert(work.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate work id '{}'",
                work.id
            )));
        }

        let mut chapter_ids = HashSet::new();
        for chapter in &work.chapters {
            if chapter.id.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "work '{}' has a chapter with an empty id",
                    work.id
                )));
            }

            if !chapter_ids.insert(chapter.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate chapter id '{}' in work '{}'",
                    chapter.id, work.id
                )));
            }

            if !chapter.number.is_finite() {
                return Err(ConfigError::Validation(format!(
                    "chapter '{}' has a non-finite number",
                    chapter.id
                )));
            }

            Url::parse(&chapter.url).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid chapter URL '{}': {}", chapter.url, e))
            })?;
        }
    }

    Ok(())
}

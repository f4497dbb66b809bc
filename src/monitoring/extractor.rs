//! Fetches a page and pulls out the text of the element a task watches.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("No element matches locator '{0}'")]
    NotFound(String),
    #[error("Invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },
}

/// Text found at a locator, already trimmed, plus the page title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub content: String,
    pub title: String,
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Returns the content at `locator` on the page at `url`.
    ///
    /// Implementations bound their own wait for the element and fail with a
    /// reason instead of blocking indefinitely.
    async fn extract(&self, url: &str, locator: &str) -> Result<Extraction, ExtractError>;
}

/// Checks that `locator` is a CSS selector the extractor can evaluate.
pub fn validate_locator(locator: &str) -> Result<(), ExtractError> {
    parse_locator(locator).map(|_| ())
}

fn parse_locator(locator: &str) -> Result<Selector, ExtractError> {
    if locator.trim().is_empty() {
        return Err(ExtractError::InvalidLocator {
            locator: locator.to_string(),
            reason: "locator is empty".to_string(),
        });
    }
    Selector::parse(locator).map_err(|e| ExtractError::InvalidLocator {
        locator: locator.to_string(),
        reason: e.to_string(),
    })
}

/// Looks up the first element matching `locator` in `html`.
///
/// Returns `Ok(None)` when the element is not (yet) present.
pub fn select_text(html: &str, locator: &str) -> Result<Option<Extraction>, ExtractError> {
    let selector = parse_locator(locator)?;
    let document = Html::parse_document(html);

    let Some(element) = document.select(&selector).next() else {
        return Ok(None);
    };
    let content = element.text().collect::<String>().trim().to_string();

    let title = Selector::parse("title")
        .ok()
        .and_then(|s| {
            document
                .select(&s)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default();

    Ok(Some(Extraction { content, title }))
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub page_load_timeout: Duration,
    /// How long to keep re-fetching while the element is missing.
    pub element_wait: Duration,
    pub poll_interval: Duration,
    pub user_agent: String,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            page_load_timeout: Duration::from_secs(30),
            element_wait: Duration::from_secs(20),
            poll_interval: Duration::from_secs(2),
            user_agent: "Mozilla/5.0 (compatible; webmonitor)".to_string(),
        }
    }
}

/// Extractor backed by plain HTTP requests and CSS selectors.
pub struct HttpContentExtractor {
    client: Client,
    settings: ExtractorSettings,
}

impl HttpContentExtractor {
    pub fn new(settings: ExtractorSettings) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(settings.page_load_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| ExtractError::Network(e.to_string()))?;
        Ok(Self { client, settings })
    }

    async fn fetch(&self, url: &str) -> Result<String, ExtractError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractError::Timeout(self.settings.page_load_timeout)
            } else {
                ExtractError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::HttpStatus(status.as_u16()));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                ExtractError::Timeout(self.settings.page_load_timeout)
            } else {
                ExtractError::Network(e.to_string())
            }
        })
    }
}

#[async_trait]
impl ContentExtractor for HttpContentExtractor {
    async fn extract(&self, url: &str, locator: &str) -> Result<Extraction, ExtractError> {
        validate_locator(locator)?;
        let deadline = Instant::now() + self.settings.element_wait;

        loop {
            info!(url = %url, "Fetching page.");
            let html = self.fetch(url).await?;
            if let Some(extraction) = select_text(&html, locator)? {
                debug!(url = %url, title = %extraction.title, "Element found.");
                return Ok(extraction);
            }
            if Instant::now() + self.settings.poll_interval > deadline {
                return Err(ExtractError::NotFound(locator.to_string()));
            }
            debug!(url = %url, locator = %locator, "Element not present yet, retrying.");
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

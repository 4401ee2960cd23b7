//! Web search and page extraction client.
//!
//! Search returns at most `max_results` hits per query. Fetching tries the
//! extract endpoint first and falls back to a direct GET of the page; either
//! way the text is cleaned and truncated.

use std::time::Duration;

use async_trait::async_trait;
use dossier_core::{PageFetcher, SearchHit, SearchProvider, ServiceError, ServiceResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{transport_error, ProviderResult};
use crate::html::clean_page;
use crate::http::{build_client, endpoint, ensure_success, parsed, required};

const SEARCH_SERVICE: &str = "search";
const FETCH_SERVICE: &str = "fetch";

pub const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

/// Search/extract client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TavilyConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    pub max_results: usize,
    pub search_depth: String,
    /// Characters kept from each fetched page.
    pub max_content_chars: usize,
    pub timeout_secs: u64,
}

impl TavilyConfig {
    pub fn new(api_key: &str) -> Self {
        TavilyConfig {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_results: 10,
            search_depth: "advanced".to_string(),
            max_content_chars: 50_000,
            timeout_secs: 30,
        }
    }

    /// `TAVILY_API_KEY` (required), `TAVILY_BASE_URL`, `TAVILY_MAX_RESULTS`,
    /// `DOSSIER_MAX_PAGE_CHARS`.
    pub fn from_env() -> ProviderResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> ProviderResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(&required(&lookup, SEARCH_SERVICE, "TAVILY_API_KEY")?);
        if let Some(base_url) = lookup("TAVILY_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(max) = parsed(&lookup, SEARCH_SERVICE, "TAVILY_MAX_RESULTS")? {
            config.max_results = max;
        }
        if let Some(max) = parsed(&lookup, FETCH_SERVICE, "DOSSIER_MAX_PAGE_CHARS")? {
            config.max_content_chars = max;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_max_content_chars(mut self, max_content_chars: usize) -> Self {
        self.max_content_chars = max_content_chars;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    include_answer: bool,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    api_key: &'a str,
    urls: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    results: Vec<ExtractResult>,
}

#[derive(Debug, Deserialize)]
struct ExtractResult {
    #[serde(default)]
    raw_content: Option<String>,
}

/// Search provider and page fetcher over one HTTP client
pub struct TavilyClient {
    config: TavilyConfig,
    http_client: Client,
}

impl TavilyClient {
    pub fn new(config: TavilyConfig) -> ProviderResult<Self> {
        let http_client = build_client(Duration::from_secs(10))?;
        Ok(TavilyClient { config, http_client })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(TavilyConfig::from_env()?)
    }

    pub fn config(&self) -> &TavilyConfig {
        &self.config
    }

    async fn extract(&self, url: &str) -> ServiceResult<Option<String>> {
        let timeout = self.config.timeout();
        let response = self
            .http_client
            .post(endpoint(&self.config.base_url, "/extract"))
            .timeout(timeout)
            .json(&ExtractRequest {
                api_key: &self.config.api_key,
                urls: [url],
            })
            .send()
            .await
            .map_err(|e| transport_error(FETCH_SERVICE, &e, timeout))?;
        let response = ensure_success(FETCH_SERVICE, response).await?;
        let parsed: ExtractResponse = response
            .json()
            .await
            .map_err(|e| transport_error(FETCH_SERVICE, &e, timeout))?;
        Ok(parsed
            .results
            .into_iter()
            .find_map(|r| r.raw_content)
            .filter(|c| !c.trim().is_empty()))
    }

    async fn direct(&self, url: &str) -> ServiceResult<String> {
        let timeout = self.config.timeout();
        let response = self
            .http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(FETCH_SERVICE, &e, timeout))?;
        let response = ensure_success(FETCH_SERVICE, response).await?;
        response
            .text()
            .await
            .map_err(|e| transport_error(FETCH_SERVICE, &e, timeout))
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> ServiceResult<Vec<SearchHit>> {
        let timeout = self.config.timeout();
        let response = self
            .http_client
            .post(endpoint(&self.config.base_url, "/search"))
            .timeout(timeout)
            .json(&SearchRequest {
                api_key: &self.config.api_key,
                query,
                search_depth: &self.config.search_depth,
                include_answer: false,
                max_results: self.config.max_results,
            })
            .send()
            .await
            .map_err(|e| transport_error(SEARCH_SERVICE, &e, timeout))?;
        let response = ensure_success(SEARCH_SERVICE, response).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| transport_error(SEARCH_SERVICE, &e, timeout))?;

        let hits: Vec<SearchHit> = parsed
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(self.config.max_results)
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
                snippet: r.content,
            })
            .collect();
        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }
}

#[async_trait]
impl PageFetcher for TavilyClient {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> ServiceResult<String> {
        match self.extract(url).await {
            Ok(Some(content)) => {
                let cleaned = clean_page(&content, self.config.max_content_chars);
                debug!(via = "extract", chars = cleaned.len(), "page fetched");
                return Ok(cleaned);
            }
            Ok(None) => debug!("extract returned no content, fetching directly"),
            Err(err) => warn!(error = %err, "extract failed, fetching directly"),
        }

        let raw = self.direct(url).await?;
        let cleaned = clean_page(&raw, self.config.max_content_chars);
        if cleaned.is_empty() {
            return Err(ServiceError::invalid_response(FETCH_SERVICE, "page has no readable text"));
        }
        debug!(via = "direct", chars = cleaned.len(), "page fetched");
        Ok(cleaned)
    }
}

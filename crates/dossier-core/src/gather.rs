//! Search and fetch fan-out.
//!
//! Both stages run as a rolling window of in-flight futures. Failures are
//! per item: a failed query contributes no hits, a failed fetch drops the
//! source. Only cancellation aborts the stage.

use std::collections::HashSet;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cancel::CancelSignal;
use crate::dedup::normalize_url;
use crate::error::{DossierError, DossierResult};
use crate::obs;
use crate::providers::{PageFetcher, SearchProvider};
use crate::source::{QueryCategory, Source};

/// A planned search query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub category: Option<QueryCategory>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        SearchQuery {
            query: query.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: QueryCategory) -> Self {
        self.category = Some(category);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub target: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    /// Hits as sources, first occurrence of each normalized URL kept.
    pub sources: Vec<Source>,
    pub failed_queries: Vec<FailedItem>,
    pub duplicate_hits: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchOutcome {
    pub fetched: Vec<Source>,
    pub failed: Vec<FailedItem>,
}

/// Run every query with at most `concurrency` in flight.
#[instrument(skip_all, fields(queries = queries.len()))]
pub async fn search_all(
    search: &dyn SearchProvider,
    queries: &[SearchQuery],
    concurrency: usize,
    cancel: &CancelSignal,
) -> DossierResult<SearchOutcome> {
    let results: Vec<_> = stream::iter(queries)
        .map(|q| async move {
            cancel.check()?;
            let hits = cancel.run(search.search(&q.query)).await?;
            Ok::<_, DossierError>((q, hits))
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let mut outcome = SearchOutcome::default();
    let mut seen = HashSet::new();
    for (q, hits) in results {
        let hits = match hits {
            Ok(hits) => hits,
            Err(e) => {
                warn!(event = "search.query_failed", query = %q.query, error = %e);
                outcome.failed_queries.push(FailedItem {
                    target: q.query.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        for hit in hits {
            if !seen.insert(normalize_url(&hit.url)) {
                outcome.duplicate_hits += 1;
                continue;
            }
            outcome
                .sources
                .push(Source::new(hit.url, hit.title, hit.snippet).with_query(q.query.clone(), q.category));
        }
    }

    obs::emit_stage_completed("search", outcome.sources.len(), outcome.duplicate_hits);
    Ok(outcome)
}

/// Best-effort fetch: the error becomes a descriptive reason.
async fn fetch_one(fetcher: &dyn PageFetcher, url: &str) -> Result<String, String> {
    match fetcher.fetch(url).await {
        Ok(body) if body.trim().is_empty() => Err("empty page".to_string()),
        Ok(body) => Ok(body),
        Err(e) => Err(format!("fetch failed: {e}")),
    }
}

/// Fill in `content` for each source, at most `concurrency` fetches in flight.
///
/// Sources that already carry content are passed through without a fetch.
#[instrument(skip_all, fields(sources = sources.len()))]
pub async fn fetch_all(
    fetcher: &dyn PageFetcher,
    sources: Vec<Source>,
    concurrency: usize,
    cancel: &CancelSignal,
) -> DossierResult<FetchOutcome> {
    let results: Vec<(Source, Result<Option<String>, String>)> = stream::iter(sources)
        .map(|source| async move {
            if source.content.as_deref().is_some_and(|c| !c.trim().is_empty()) {
                return Ok::<_, DossierError>((source, Ok(None)));
            }
            cancel.check()?;
            let body = cancel.run(fetch_one(fetcher, &source.url)).await?;
            Ok::<_, DossierError>((source, body.map(Some)))
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let mut outcome = FetchOutcome::default();
    for (source, body) in results {
        match body {
            Ok(None) => outcome.fetched.push(source),
            Ok(Some(body)) => outcome.fetched.push(source.with_content(body)),
            Err(reason) => {
                debug!(url = %source.url, reason = %reason, "source dropped at fetch");
                obs::emit_source_dropped("fetch", &source.url, &reason);
                outcome.failed.push(FailedItem {
                    target: source.url,
                    reason,
                });
            }
        }
    }

    obs::emit_stage_completed("fetch", outcome.fetched.len(), outcome.failed.len());
    Ok(outcome)
}

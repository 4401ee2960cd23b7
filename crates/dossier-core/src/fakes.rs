//! In-memory fakes for the provider traits (testing only)
//!
//! Provides `ScriptedCompletion`, `MemorySearch`, `MemoryFetcher`,
//! `ScriptedSynthesis` and `RecordingObserver` that satisfy the trait
//! contracts without any network access.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ServiceError, ServiceResult};
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::providers::{
    CompletionOptions, CompletionService, JobHandle, JobSnapshot, PageFetcher, SearchHit, SearchProvider,
    SynthesisEvent, SynthesisRequest, SynthesisService, SynthesisStream,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedCompletion
// ---------------------------------------------------------------------------

/// A recorded completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionCall {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

/// Completion service answering from routes and an ordered script.
///
/// A route answers every call whose system prompt contains its needle.
/// Calls matching no route consume the script in order; once it runs out
/// the fake answers `InvalidResponse`.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    routes: Vec<(String, ServiceResult<String>)>,
    script: Mutex<VecDeque<ServiceResult<String>>>,
    calls: Mutex<Vec<CompletionCall>>,
}

impl ScriptedCompletion {
    pub fn new(script: Vec<ServiceResult<String>>) -> Self {
        ScriptedCompletion {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn route(mut self, system_needle: impl Into<String>, response: ServiceResult<String>) -> Self {
        self.routes.push((system_needle.into(), response));
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn recorded(&self) -> Vec<CompletionCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, system: &str, user: &str, options: &CompletionOptions) -> ServiceResult<String> {
        lock(&self.calls).push(CompletionCall {
            system: system.to_string(),
            user: user.to_string(),
            max_tokens: options.max_tokens,
        });

        if let Some((_, response)) = self.routes.iter().find(|(needle, _)| system.contains(needle.as_str())) {
            return response.clone();
        }
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::invalid_response("completion", "script exhausted")))
    }
}

// ---------------------------------------------------------------------------
// MemorySearch
// ---------------------------------------------------------------------------

/// Search provider backed by a `HashMap<query, hits>`. Unknown queries return nothing.
#[derive(Debug, Default)]
pub struct MemorySearch {
    results: HashMap<String, ServiceResult<Vec<SearchHit>>>,
    queries: Mutex<Vec<String>>,
}

impl MemorySearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, query: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        self.results.insert(query.into(), Ok(hits));
        self
    }

    pub fn with_failure(mut self, query: impl Into<String>, err: ServiceError) -> Self {
        self.results.insert(query.into(), Err(err));
        self
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl SearchProvider for MemorySearch {
    async fn search(&self, query: &str) -> ServiceResult<Vec<SearchHit>> {
        lock(&self.queries).push(query.to_string());
        self.results.get(query).cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// MemoryFetcher
// ---------------------------------------------------------------------------

/// Page fetcher backed by a `HashMap<url, body>`. Unknown URLs fail with HTTP 404.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    pages: HashMap<String, ServiceResult<String>>,
    delay: Option<Duration>,
    fetched: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), Ok(body.into()));
        self
    }

    pub fn with_failure(mut self, url: impl Into<String>, err: ServiceError) -> Self {
        self.pages.insert(url.into(), Err(err));
        self
    }

    /// Sleep this long (tokio time) before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> ServiceResult<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.fetched.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(ServiceError::http("fetch", 404, format!("no page for {url}"))))
    }
}

// ---------------------------------------------------------------------------
// ScriptedSynthesis
// ---------------------------------------------------------------------------

/// One step of a scripted synthesis stream.
#[derive(Debug, Clone)]
pub enum StreamStep {
    Event(SynthesisEvent),
    Error(ServiceError),
    /// Wait this long (tokio time) before the next step.
    Delay(Duration),
    /// Never yield again.
    Hang,
}

struct ScriptedStream {
    steps: VecDeque<StreamStep>,
}

#[async_trait]
impl SynthesisStream for ScriptedStream {
    async fn next_event(&mut self) -> Option<ServiceResult<SynthesisEvent>> {
        loop {
            match self.steps.pop_front()? {
                StreamStep::Event(event) => return Some(Ok(event)),
                StreamStep::Error(err) => return Some(Err(err)),
                StreamStep::Delay(d) => tokio::time::sleep(d).await,
                StreamStep::Hang => std::future::pending::<()>().await,
            }
        }
    }
}

/// Synthesis service replaying one stream script per `create` and a queue of
/// poll answers for `retrieve` (the last answer repeats).
#[derive(Debug, Default)]
pub struct ScriptedSynthesis {
    streams: Mutex<VecDeque<ServiceResult<Vec<StreamStep>>>>,
    polls: Mutex<VecDeque<ServiceResult<JobSnapshot>>>,
    requests: Mutex<Vec<SynthesisRequest>>,
    retrieves: AtomicUsize,
}

impl ScriptedSynthesis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(self, steps: Vec<StreamStep>) -> Self {
        lock(&self.streams).push_back(Ok(steps));
        self
    }

    pub fn with_create_error(self, err: ServiceError) -> Self {
        lock(&self.streams).push_back(Err(err));
        self
    }

    pub fn with_poll(self, answer: ServiceResult<JobSnapshot>) -> Self {
        lock(&self.polls).push_back(answer);
        self
    }

    pub fn creates(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        lock(&self.requests).clone()
    }

    pub fn retrieves(&self) -> usize {
        self.retrieves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisService for ScriptedSynthesis {
    async fn create(&self, request: &SynthesisRequest) -> ServiceResult<Box<dyn SynthesisStream>> {
        lock(&self.requests).push(request.clone());
        let steps = lock(&self.streams)
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::invalid_response("synthesis", "no scripted stream")))?;
        Ok(Box::new(ScriptedStream { steps: steps.into() }))
    }

    async fn retrieve(&self, handle: &JobHandle) -> ServiceResult<JobSnapshot> {
        self.retrieves.fetch_add(1, Ordering::SeqCst);
        let mut polls = lock(&self.polls);
        match polls.len() {
            0 => Err(ServiceError::http("synthesis", 404, format!("unknown job {handle}"))),
            1 => polls.front().cloned().unwrap_or_else(|| Err(ServiceError::invalid_response("synthesis", "empty"))),
            _ => polls
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::invalid_response("synthesis", "empty"))),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingObserver
// ---------------------------------------------------------------------------

/// Observer that keeps every event it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingObserver {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        lock(&self.events).clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_event(&self, event: ProgressEvent) {
        lock(&self.events).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::JobStatus;

    #[tokio::test]
    async fn test_scripted_completion_routes_before_script() {
        let fake = ScriptedCompletion::new(vec![Ok("first".into())]).route("scoring", Ok("[]".into()));
        let opts = CompletionOptions::new(10);
        assert_eq!(fake.complete("You are scoring", "u", &opts).await.unwrap(), "[]");
        assert_eq!(fake.complete("other", "u", &opts).await.unwrap(), "first");
        assert!(fake.complete("other", "u", &opts).await.is_err());
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_synthesis_repeats_last_poll() {
        let fake = ScriptedSynthesis::new()
            .with_poll(Ok(JobSnapshot::pending(JobStatus::Queued)))
            .with_poll(Ok(JobSnapshot::pending(JobStatus::InProgress)));
        let h = JobHandle::new("resp_1");
        assert_eq!(fake.retrieve(&h).await.unwrap().status, JobStatus::Queued);
        assert_eq!(fake.retrieve(&h).await.unwrap().status, JobStatus::InProgress);
        assert_eq!(fake.retrieve(&h).await.unwrap().status, JobStatus::InProgress);
        assert_eq!(fake.retrieves(), 3);
    }

    #[tokio::test]
    async fn test_memory_fetcher_unknown_url_is_404() {
        let fake = MemoryFetcher::new().with_page("https://a.org", "body");
        assert_eq!(fake.fetch("https://a.org").await.unwrap(), "body");
        let err = fake.fetch("https://b.org").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}

//! Seams to the external services the pipeline consumes.
//!
//! Every trait is object safe and `Send + Sync` so a run context can hold
//! `Arc<dyn Trait>` handles. Implementations over HTTP live in the
//! `dossier-providers` crate; in-memory doubles live in [`crate::fakes`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> ServiceResult<Vec<SearchHit>>;
}

/// Full-text page retrieval.
///
/// Callers treat failures as best-effort: the pipeline turns an error into a
/// descriptive string and skips the source.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> ServiceResult<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn new(max_tokens: u32) -> Self {
        CompletionOptions {
            max_tokens,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Single-turn text completion used for classification, scoring and extraction.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, system: &str, user: &str, options: &CompletionOptions) -> ServiceResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisTool {
    WebSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub developer_message: String,
    pub user_message: String,
    pub tools: Vec<SynthesisTool>,
    pub max_tool_calls: u32,
    pub background: bool,
    pub stream: bool,
}

impl SynthesisRequest {
    /// Background-capable streamed request, the only shape the orchestrator issues.
    pub fn streamed(developer_message: impl Into<String>, user_message: impl Into<String>) -> Self {
        SynthesisRequest {
            developer_message: developer_message.into(),
            user_message: user_message.into(),
            tools: Vec::new(),
            max_tool_calls: 1,
            background: true,
            stream: true,
        }
    }

    pub fn with_web_search(mut self, max_tool_calls: u32) -> Self {
        if !self.tools.contains(&SynthesisTool::WebSearch) {
            self.tools.push(SynthesisTool::WebSearch);
        }
        self.max_tool_calls = max_tool_calls;
        self
    }
}

/// Server-side identifier of a background synthesis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        JobHandle(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    /// Finished early (for example, output token limit); output may be partial.
    Incomplete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::InProgress)
    }

    /// Lenient mapping of a provider status string.
    pub fn parse(raw: &str) -> JobStatus {
        match raw {
            "queued" => JobStatus::Queued,
            "completed" => JobStatus::Completed,
            "incomplete" => JobStatus::Incomplete,
            "failed" => JobStatus::Failed,
            "cancelled" | "canceled" => JobStatus::Cancelled,
            _ => JobStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub text: String,
    pub citations: Vec<Citation>,
    pub search_count: u32,
    pub usage: TokenUsage,
}

/// Point-in-time view of a background job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    /// Final output once terminal; partial text where the provider exposes it.
    pub output: Option<SynthesisOutput>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn pending(status: JobStatus) -> Self {
        JobSnapshot {
            status,
            output: None,
            error: None,
        }
    }

    pub fn completed(output: SynthesisOutput) -> Self {
        JobSnapshot {
            status: JobStatus::Completed,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        JobSnapshot {
            status: JobStatus::Failed,
            output: None,
            error: Some(message.into()),
        }
    }
}

/// Events decoded from a live synthesis stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    /// The job exists server-side and can be polled by this handle.
    Created { handle: JobHandle },
    SearchStarted { query: Option<String> },
    PageVisited { url: Option<String> },
    ReasoningStep { summary: Option<String> },
    TextDelta(String),
    Completed(SynthesisOutput),
    Failed { message: String },
    /// Terminal without a full result; carries whatever text was produced.
    Incomplete { reason: String },
    Other,
}

/// A live event stream. `None` means the stream ended.
#[async_trait]
pub trait SynthesisStream: Send {
    async fn next_event(&mut self) -> Option<ServiceResult<SynthesisEvent>>;
}

/// Long-running synthesis with web-search capability.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Launch a job. Not idempotent: callers must never retry it blindly.
    async fn create(&self, request: &SynthesisRequest) -> ServiceResult<Box<dyn SynthesisStream>>;

    /// Idempotent status/result lookup.
    async fn retrieve(&self, handle: &JobHandle) -> ServiceResult<JobSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Incomplete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert_eq!(JobStatus::parse("canceled"), JobStatus::Cancelled);
        assert_eq!(JobStatus::parse("whatever"), JobStatus::InProgress);
    }

    #[test]
    fn test_streamed_request_with_web_search() {
        let req = SynthesisRequest::streamed("dev", "user").with_web_search(20).with_web_search(20);
        assert!(req.background && req.stream);
        assert_eq!(req.tools, vec![SynthesisTool::WebSearch]);
        assert_eq!(req.max_tool_calls, 20);
    }
}

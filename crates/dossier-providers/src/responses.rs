//! Long-running synthesis over the Responses API.
//!
//! `create` launches a background job with streaming enabled and decodes the
//! server-sent events into [`SynthesisEvent`]s. `retrieve` looks the job up
//! by id, which is what the orchestrator polls after a lost stream.
//!
//! The final text is taken from the `output_text` part of the last message
//! item; `url_citation` annotations become citations and every
//! `web_search_call` item counts as one search.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dossier_core::{
    Citation, JobHandle, JobSnapshot, JobStatus, ServiceError, ServiceResult, SynthesisEvent, SynthesisOutput,
    SynthesisRequest, SynthesisService, SynthesisStream, SynthesisTool, TokenUsage,
};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::error::{transport_error, ProviderResult};
use crate::http::{build_client, endpoint, ensure_success, parsed, required};
use crate::sse::{SseDecoder, SseEvent};

const SERVICE: &str = "synthesis";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "o3-deep-research-2025-06-26";

/// Synthesis client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Timeout for a single retrieve call. Streams are bounded by the
    /// orchestrator's wall-clock cap instead.
    pub retrieve_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl ResponsesConfig {
    pub fn new(api_key: &str) -> Self {
        ResponsesConfig {
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            retrieve_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }

    /// `OPENAI_API_KEY` (required), `DOSSIER_SYNTHESIS_MODEL`,
    /// `OPENAI_BASE_URL`, `DOSSIER_RETRIEVE_TIMEOUT_SECS`.
    pub fn from_env() -> ProviderResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> ProviderResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(&required(&lookup, SERVICE, "OPENAI_API_KEY")?);
        if let Some(model) = lookup("DOSSIER_SYNTHESIS_MODEL") {
            config.model = model;
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(secs) = parsed(&lookup, SERVICE, "DOSSIER_RETRIEVE_TIMEOUT_SECS")? {
            config.retrieve_timeout_secs = secs;
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn retrieve_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieve_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseObject {
    id: String,
    status: String,
    output: Vec<OutputItem>,
    usage: Option<Usage>,
    error: Option<ApiError>,
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    WebSearchCall {
        #[serde(default)]
        action: Option<SearchAction>,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<SummaryPart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText {
        #[serde(default)]
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Annotation {
    UrlCitation {
        #[serde(default)]
        url: String,
        #[serde(default)]
        title: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SearchAction {
    Search {
        #[serde(default)]
        query: Option<String>,
    },
    OpenPage {
        #[serde(default)]
        url: Option<String>,
    },
    FindInPage {
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct SummaryPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutputTokensDetails {
    reasoning_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IncompleteDetails {
    reason: String,
}

/// Stream frames, keyed by their `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamFrame {
    #[serde(rename = "response.created")]
    Created { response: ResponseObject },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.reasoning_summary_text.done")]
    ReasoningSummaryDone {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseObject },
    #[serde(rename = "response.failed")]
    Failed { response: ResponseObject },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: ResponseObject },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

impl ResponseObject {
    fn into_output(self) -> SynthesisOutput {
        let search_count = self
            .output
            .iter()
            .filter(|item| matches!(item, OutputItem::WebSearchCall { .. }))
            .count();
        let usage = self.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            reasoning_tokens: u.output_tokens_details.map_or(0, |d| d.reasoning_tokens),
        });

        let last_message = self.output.into_iter().rev().find_map(|item| match item {
            OutputItem::Message { content } => Some(content),
            _ => None,
        });
        let text_part = last_message.into_iter().flatten().find_map(|part| match part {
            ContentPart::OutputText { text, annotations } => Some((text, annotations)),
            ContentPart::Other => None,
        });
        let (text, annotations) = text_part.unwrap_or_default();
        let citations = annotations
            .into_iter()
            .filter_map(|a| match a {
                Annotation::UrlCitation { url, title } => Some(Citation { url, title }),
                Annotation::Other => None,
            })
            .collect();

        SynthesisOutput {
            text,
            citations,
            search_count: u32::try_from(search_count).unwrap_or(u32::MAX),
            usage: usage.unwrap_or_default(),
        }
    }

    fn error_message(&self) -> String {
        match &self.error {
            Some(err) if !err.message.is_empty() => err.message.clone(),
            _ => format!("response {} ended with status {}", self.id, self.status),
        }
    }

    fn incomplete_reason(&self) -> String {
        self.incomplete_details
            .as_ref()
            .map(|d| d.reason.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "incomplete".to_string())
    }

    fn into_snapshot(self) -> JobSnapshot {
        let status = JobStatus::parse(&self.status);
        match status {
            JobStatus::Queued | JobStatus::InProgress => JobSnapshot::pending(status),
            JobStatus::Failed | JobStatus::Cancelled => JobSnapshot {
                status,
                error: Some(self.error_message()),
                output: None,
            },
            JobStatus::Completed | JobStatus::Incomplete => {
                let error = (status == JobStatus::Incomplete).then(|| self.incomplete_reason());
                JobSnapshot {
                    status,
                    output: Some(self.into_output()),
                    error,
                }
            }
        }
    }
}

fn item_event(item: OutputItem) -> SynthesisEvent {
    match item {
        OutputItem::WebSearchCall { action } => match action {
            Some(SearchAction::OpenPage { url }) | Some(SearchAction::FindInPage { url }) => {
                SynthesisEvent::PageVisited { url }
            }
            Some(SearchAction::Search { query }) => SynthesisEvent::SearchStarted { query },
            Some(SearchAction::Other) | None => SynthesisEvent::SearchStarted { query: None },
        },
        OutputItem::Reasoning { summary } => SynthesisEvent::ReasoningStep {
            summary: summary.into_iter().map(|s| s.text).find(|t| !t.is_empty()),
        },
        OutputItem::Message { .. } | OutputItem::Other => SynthesisEvent::Other,
    }
}

/// Map one SSE event onto the orchestrator's vocabulary.
///
/// Undecodable frames become `Other` so one malformed event does not abandon
/// an otherwise healthy stream.
fn map_event(event: &SseEvent) -> SynthesisEvent {
    if event.data.trim() == "[DONE]" {
        return SynthesisEvent::Other;
    }
    let frame = match serde_json::from_str::<StreamFrame>(&event.data) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(sse_event = ?event.event, error = %err, "undecodable stream frame");
            return SynthesisEvent::Other;
        }
    };
    match frame {
        StreamFrame::Created { response } => SynthesisEvent::Created {
            handle: JobHandle::new(response.id),
        },
        StreamFrame::OutputItemAdded { item } => item_event(item),
        StreamFrame::OutputTextDelta { delta } => SynthesisEvent::TextDelta(delta),
        StreamFrame::ReasoningSummaryDone { text } => SynthesisEvent::ReasoningStep { summary: Some(text) },
        StreamFrame::Completed { response } => SynthesisEvent::Completed(response.into_output()),
        StreamFrame::Failed { response } => SynthesisEvent::Failed {
            message: response.error_message(),
        },
        StreamFrame::Incomplete { response } => SynthesisEvent::Incomplete {
            reason: response.incomplete_reason(),
        },
        StreamFrame::Error { message } => SynthesisEvent::Failed { message },
        StreamFrame::Other => SynthesisEvent::Other,
    }
}

fn request_body(model: &str, request: &SynthesisRequest) -> serde_json::Value {
    let tools: Vec<serde_json::Value> = request
        .tools
        .iter()
        .map(|tool| match tool {
            SynthesisTool::WebSearch => json!({ "type": "web_search_preview" }),
        })
        .collect();
    let mut body = json!({
        "model": model,
        "input": [
            {
                "role": "developer",
                "content": [{ "type": "input_text", "text": request.developer_message }],
            },
            {
                "role": "user",
                "content": [{ "type": "input_text", "text": request.user_message }],
            },
        ],
        "background": request.background,
        "stream": request.stream,
        "store": true,
        "reasoning": { "summary": "auto" },
    });
    if !tools.is_empty() {
        body["tools"] = json!(tools);
        body["max_tool_calls"] = json!(request.max_tool_calls);
    }
    body
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Live event stream over one open response body.
pub struct ResponsesStream {
    response: Response,
    decoder: SseDecoder,
    queued: VecDeque<SseEvent>,
    finished: bool,
}

impl ResponsesStream {
    fn new(response: Response) -> Self {
        ResponsesStream {
            response,
            decoder: SseDecoder::new(),
            queued: VecDeque::new(),
            finished: false,
        }
    }
}

#[async_trait]
impl SynthesisStream for ResponsesStream {
    async fn next_event(&mut self) -> Option<ServiceResult<SynthesisEvent>> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(Ok(map_event(&event)));
            }
            if self.finished {
                return None;
            }
            match self.response.chunk().await {
                Ok(Some(bytes)) => self.queued.extend(self.decoder.push(&bytes)),
                Ok(None) => {
                    self.finished = true;
                    self.queued.extend(self.decoder.finish());
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(ServiceError::network(SERVICE, err.to_string())));
                }
            }
        }
    }
}

/// Synthesis client over the Responses API
pub struct ResponsesClient {
    config: ResponsesConfig,
    http_client: Client,
}

impl ResponsesClient {
    pub fn new(config: ResponsesConfig) -> ProviderResult<Self> {
        let http_client = build_client(Duration::from_secs(config.connect_timeout_secs))?;
        Ok(ResponsesClient { config, http_client })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(ResponsesConfig::from_env()?)
    }

    pub fn config(&self) -> &ResponsesConfig {
        &self.config
    }
}

#[async_trait]
impl SynthesisService for ResponsesClient {
    #[instrument(skip_all, fields(model = %self.config.model, tools = request.tools.len()))]
    async fn create(&self, request: &SynthesisRequest) -> ServiceResult<Box<dyn SynthesisStream>> {
        let response = self
            .http_client
            .post(endpoint(&self.config.base_url, "/v1/responses"))
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request_body(&self.config.model, request))
            .send()
            .await
            .map_err(|e| ServiceError::network(SERVICE, e.to_string()))?;
        let response = ensure_success(SERVICE, response).await?;
        debug!("synthesis stream opened");
        Ok(Box::new(ResponsesStream::new(response)))
    }

    #[instrument(skip_all, fields(handle = %handle))]
    async fn retrieve(&self, handle: &JobHandle) -> ServiceResult<JobSnapshot> {
        let timeout = self.config.retrieve_timeout();
        let response = self
            .http_client
            .get(endpoint(
                &self.config.base_url,
                &format!("/v1/responses/{}", handle.as_str()),
            ))
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, &e, timeout))?;
        let response = ensure_success(SERVICE, response).await?;
        let object: ResponseObject = response
            .json()
            .await
            .map_err(|e| transport_error(SERVICE, &e, timeout))?;
        debug!(status = %object.status, "synthesis job retrieved");
        Ok(object.into_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETED: &str = r#"{
        "id": "resp_1",
        "status": "completed",
        "output": [
            {"type": "reasoning", "summary": []},
            {"type": "web_search_call", "action": {"type": "search", "query": "jane doe"}},
            {"type": "web_search_call", "action": {"type": "open_page", "url": "https://a.org"}},
            {"type": "message", "content": [{"type": "output_text", "text": "draft", "annotations": []}]},
            {"type": "message", "content": [
                {"type": "output_text", "text": "final", "annotations": [
                    {"type": "url_citation", "url": "https://a.org", "title": "A", "start_index": 0, "end_index": 5},
                    {"type": "file_citation", "file_id": "f"}
                ]}
            ]}
        ],
        "usage": {"input_tokens": 100, "output_tokens": 50, "output_tokens_details": {"reasoning_tokens": 30}}
    }"#;

    fn sse(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_output_uses_last_message_and_counts_searches() {
        let object: ResponseObject = serde_json::from_str(COMPLETED).unwrap();
        let output = object.into_output();
        assert_eq!(output.text, "final");
        assert_eq!(output.search_count, 2);
        assert_eq!(
            output.citations,
            vec![Citation {
                url: "https://a.org".into(),
                title: "A".into()
            }]
        );
        assert_eq!(output.usage.reasoning_tokens, 30);
    }

    #[test]
    fn test_snapshot_status_mapping() {
        let pending: ResponseObject = serde_json::from_str(r#"{"id":"r","status":"queued"}"#).unwrap();
        assert_eq!(pending.into_snapshot(), JobSnapshot::pending(JobStatus::Queued));

        let failed: ResponseObject =
            serde_json::from_str(r#"{"id":"r","status":"failed","error":{"message":"server_error"}}"#).unwrap();
        assert_eq!(failed.into_snapshot(), JobSnapshot::failed("server_error"));

        let incomplete: ResponseObject = serde_json::from_str(
            r#"{"id":"r","status":"incomplete","incomplete_details":{"reason":"max_output_tokens"},
                "output":[{"type":"message","content":[{"type":"output_text","text":"half"}]}]}"#,
        )
        .unwrap();
        let snapshot = incomplete.into_snapshot();
        assert_eq!(snapshot.status, JobStatus::Incomplete);
        assert_eq!(snapshot.output.map(|o| o.text).as_deref(), Some("half"));
        assert_eq!(snapshot.error.as_deref(), Some("max_output_tokens"));
    }

    #[test]
    fn test_stream_frames_map_to_events() {
        assert_eq!(
            map_event(&sse(r#"{"type":"response.created","response":{"id":"resp_9","status":"queued"}}"#)),
            SynthesisEvent::Created {
                handle: JobHandle::new("resp_9")
            }
        );
        assert_eq!(
            map_event(&sse(
                r#"{"type":"response.output_item.added","item":{"type":"web_search_call","action":{"type":"search","query":"q"}}}"#
            )),
            SynthesisEvent::SearchStarted { query: Some("q".into()) }
        );
        assert_eq!(
            map_event(&sse(
                r#"{"type":"response.output_item.added","item":{"type":"web_search_call","action":{"type":"open_page","url":"https://b"}}}"#
            )),
            SynthesisEvent::PageVisited {
                url: Some("https://b".into())
            }
        );
        assert_eq!(
            map_event(&sse(r#"{"type":"response.output_item.added","item":{"type":"reasoning","summary":[]}}"#)),
            SynthesisEvent::ReasoningStep { summary: None }
        );
        assert_eq!(
            map_event(&sse(r#"{"type":"response.output_text.delta","delta":"ab"}"#)),
            SynthesisEvent::TextDelta("ab".into())
        );
        assert_eq!(
            map_event(&sse(r#"{"type":"response.reasoning_summary_text.done","text":"plan"}"#)),
            SynthesisEvent::ReasoningStep {
                summary: Some("plan".into())
            }
        );
        assert_eq!(
            map_event(&sse(
                r#"{"type":"response.incomplete","response":{"id":"r","status":"incomplete","incomplete_details":{"reason":"max_output_tokens"}}}"#
            )),
            SynthesisEvent::Incomplete {
                reason: "max_output_tokens".into()
            }
        );
        assert_eq!(
            map_event(&sse(r#"{"type":"error","message":"rate limited"}"#)),
            SynthesisEvent::Failed {
                message: "rate limited".into()
            }
        );
        assert_eq!(map_event(&sse(r#"{"type":"response.in_progress"}"#)), SynthesisEvent::Other);
        assert_eq!(map_event(&sse("not json")), SynthesisEvent::Other);
        assert_eq!(map_event(&sse("[DONE]")), SynthesisEvent::Other);
    }

    #[test]
    fn test_request_body_includes_tools_only_when_requested() {
        let plain = request_body("m", &SynthesisRequest::streamed("dev", "user"));
        assert!(plain.get("tools").is_none());
        assert_eq!(plain["background"], true);
        assert_eq!(plain["input"][0]["role"], "developer");

        let searching = request_body("m", &SynthesisRequest::streamed("dev", "user").with_web_search(20));
        assert_eq!(searching["tools"][0]["type"], "web_search_preview");
        assert_eq!(searching["max_tool_calls"], 20);
    }
}

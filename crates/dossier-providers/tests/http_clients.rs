//! Provider clients against a local canned HTTP server.

mod common;

use std::time::Duration;

use common::{Canned, MockServer};
use dossier_core::{
    CancelSignal, CompletionOptions, CompletionService, JobHandle, JobStatus, NoopObserver, PageFetcher,
    SearchProvider, ServiceError, SynthesisConfig, SynthesisEvent, SynthesisOrchestrator, SynthesisOutcome,
    SynthesisRequest, SynthesisService, SynthesisState,
};
use dossier_providers::{
    AnthropicClient, AnthropicConfig, ProviderError, ResponsesClient, ResponsesConfig, TavilyClient, TavilyConfig,
};

fn anthropic(server: &MockServer) -> AnthropicClient {
    AnthropicClient::new(AnthropicConfig::new("sk-ant-test").with_base_url(&server.base_url)).unwrap()
}

fn tavily(server: &MockServer) -> TavilyClient {
    TavilyClient::new(TavilyConfig::new("tvly-test").with_base_url(&server.base_url)).unwrap()
}

fn responses(server: &MockServer) -> ResponsesClient {
    ResponsesClient::new(ResponsesConfig::new("sk-test").with_base_url(&server.base_url)).unwrap()
}

const COMPLETED_RESPONSE: &str = r#"{
    "id": "resp_1",
    "status": "completed",
    "output": [
        {"type": "web_search_call", "action": {"type": "search", "query": "jane doe mentor"}},
        {"type": "message", "content": [{"type": "output_text", "text": "{\"dimensions\": {}}",
            "annotations": [{"type": "url_citation", "url": "https://mag.example.com/q", "title": "Q"}]}]}
    ],
    "usage": {"input_tokens": 10, "output_tokens": 20}
}"#;

fn sse_frame(json: &str) -> String {
    let kind = serde_json::from_str::<serde_json::Value>(json).unwrap()["type"]
        .as_str()
        .unwrap()
        .to_string();
    format!("event: {kind}\ndata: {json}\n\n")
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Test: a completion sends the auth headers and returns the first text block
#[tokio::test]
async fn test_completion_returns_first_text_block() {
    let server = MockServer::start(vec![(
        "/v1/messages",
        vec![Canned::json(
            200,
            r#"{"content":[{"type":"text","text":"[{\"index\":0}]"}],"stop_reason":"end_turn"}"#,
        )],
    )])
    .await;

    let reply = anthropic(&server)
        .complete("You are screening research sources", "sources...", &CompletionOptions::new(4096))
        .await
        .unwrap();

    assert_eq!(reply, "[{\"index\":0}]");
    let request = &server.requests_to("/v1/messages")[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.headers["x-api-key"], "sk-ant-test");
    assert_eq!(request.headers["anthropic-version"], "2023-06-01");
    let body = request.json();
    assert_eq!(body["system"], "You are screening research sources");
    assert_eq!(body["max_tokens"], 4096);
    assert_eq!(body["messages"][0]["content"], "sources...");
}

/// Test: an overloaded service surfaces as a transient HTTP error
#[tokio::test]
async fn test_completion_overload_is_transient() {
    let server = MockServer::start(vec![(
        "/v1/messages",
        vec![Canned::json(
            529,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )],
    )])
    .await;

    let err = anthropic(&server)
        .complete("sys", "user", &CompletionOptions::new(16))
        .await
        .unwrap_err();

    assert_eq!(err, ServiceError::http("completion", 529, "Overloaded"));
    assert!(err.is_transient());
}

/// Test: a bad key is a permanent error
#[tokio::test]
async fn test_completion_unauthorized_is_permanent() {
    let server = MockServer::start(vec![(
        "/v1/messages",
        vec![Canned::json(401, r#"{"error":{"message":"invalid x-api-key"}}"#)],
    )])
    .await;

    let err = anthropic(&server)
        .complete("sys", "user", &CompletionOptions::new(16))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert!(!err.is_transient());
}

// ---------------------------------------------------------------------------
// Search and fetch
// ---------------------------------------------------------------------------

/// Test: search maps results and never returns more than the configured cap
#[tokio::test]
async fn test_search_maps_and_caps_results() {
    let results: Vec<String> = (0..12)
        .map(|i| format!(r#"{{"url":"https://site{i}.example.com","title":"T{i}","content":"snippet {i}"}}"#))
        .collect();
    let server = MockServer::start(vec![(
        "/search",
        vec![Canned::json(200, format!(r#"{{"results":[{}]}}"#, results.join(",")))],
    )])
    .await;

    let hits = tavily(&server).search("\"Jane Doe\" interview").await.unwrap();

    assert_eq!(hits.len(), 10);
    assert_eq!(hits[0].url, "https://site0.example.com");
    assert_eq!(hits[0].snippet, "snippet 0");
    let body = server.requests_to("/search")[0].json();
    assert_eq!(body["query"], "\"Jane Doe\" interview");
    assert_eq!(body["max_results"], 10);
    assert_eq!(body["api_key"], "tvly-test");
}

/// Test: fetch prefers extracted content and strips images from it
#[tokio::test]
async fn test_fetch_uses_extract() {
    let server = MockServer::start(vec![(
        "/extract",
        vec![Canned::json(
            200,
            r#"{"results":[{"url":"https://a.org","raw_content":"Jane said yes. ![chart](https://a.org/c.png) Then she left."}]}"#,
        )],
    )])
    .await;

    let text = tavily(&server).fetch("https://a.org").await.unwrap();

    assert_eq!(text, "Jane said yes.  Then she left.");
    assert_eq!(server.requests_to("/extract")[0].json()["urls"][0], "https://a.org");
}

/// Test: fetch falls back to a direct GET when extraction yields nothing
#[tokio::test]
async fn test_fetch_falls_back_to_direct_get() {
    let server = MockServer::start(vec![
        ("/extract", vec![Canned::json(200, r#"{"results":[],"failed_results":[{"url":"x"}]}"#)]),
        (
            "/article",
            vec![Canned::html(
                "<html><head><title>x</title></head><body><script>track()</script><p>Jane Doe on hiring.</p></body></html>",
            )],
        ),
    ])
    .await;
    let url = format!("{}/article", server.base_url);

    let text = tavily(&server).fetch(&url).await.unwrap();

    assert_eq!(text, "Jane Doe on hiring.");
    assert_eq!(server.requests_to("/article")[0].method, "GET");
}

/// Test: a failed direct GET is reported as an error the pipeline can skip
#[tokio::test]
async fn test_fetch_direct_failure_is_error() {
    let server = MockServer::start(vec![("/extract", vec![Canned::json(500, "boom")])]).await;
    let url = format!("{}/missing", server.base_url);

    let err = tavily(&server).fetch(&url).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Test: create streams decoded events through to completion
#[tokio::test]
async fn test_synthesis_stream_events() {
    let body = [
        sse_frame(r#"{"type":"response.created","response":{"id":"resp_1","status":"queued"}}"#),
        sse_frame(r#"{"type":"response.in_progress","response":{"id":"resp_1","status":"in_progress"}}"#),
        sse_frame(
            r#"{"type":"response.output_item.added","item":{"type":"web_search_call","action":{"type":"search","query":"jane doe mentor"}}}"#,
        ),
        sse_frame(r#"{"type":"response.output_text.delta","delta":"{\"dim"}"#),
        sse_frame(&format!(
            r#"{{"type":"response.completed","response":{}}}"#,
            COMPLETED_RESPONSE.replace('\n', " ")
        )),
    ]
    .concat();
    let server = MockServer::start(vec![("/v1/responses", vec![Canned::event_stream(body)])]).await;
    let client = responses(&server);

    let mut stream = client
        .create(&SynthesisRequest::streamed("dev", "user").with_web_search(20))
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        events.push(event.unwrap());
    }

    assert_eq!(events.len(), 5);
    assert_eq!(
        events[0],
        SynthesisEvent::Created {
            handle: JobHandle::new("resp_1")
        }
    );
    assert_eq!(events[1], SynthesisEvent::Other);
    assert_eq!(
        events[2],
        SynthesisEvent::SearchStarted {
            query: Some("jane doe mentor".into())
        }
    );
    assert_eq!(events[3], SynthesisEvent::TextDelta("{\"dim".into()));
    match &events[4] {
        SynthesisEvent::Completed(output) => {
            assert_eq!(output.text, "{\"dimensions\": {}}");
            assert_eq!(output.search_count, 1);
            assert_eq!(output.citations[0].url, "https://mag.example.com/q");
            assert_eq!(output.usage.output_tokens, 20);
        }
        other => panic!("expected completion, got {other:?}"),
    }

    let request = &server.requests_to("/v1/responses")[0];
    assert_eq!(request.headers["authorization"], "Bearer sk-test");
    let body = request.json();
    assert_eq!(body["background"], true);
    assert_eq!(body["stream"], true);
    assert_eq!(body["tools"][0]["type"], "web_search_preview");
}

/// Test: a rejected create is an HTTP error, not a stream
#[tokio::test]
async fn test_synthesis_create_rejected() {
    let server = MockServer::start(vec![(
        "/v1/responses",
        vec![Canned::json(400, r#"{"error":{"message":"unknown model"}}"#)],
    )])
    .await;

    let result = responses(&server).create(&SynthesisRequest::streamed("dev", "user")).await;

    assert!(matches!(result, Err(ServiceError::Http { status: 400, ref message, .. }) if message == "unknown model"));
}

/// Test: retrieve maps pending and completed jobs
#[tokio::test]
async fn test_synthesis_retrieve() {
    let server = MockServer::start(vec![(
        "/v1/responses/resp_1",
        vec![
            Canned::json(200, r#"{"id":"resp_1","status":"in_progress","output":[]}"#),
            Canned::json(200, COMPLETED_RESPONSE),
        ],
    )])
    .await;
    let client = responses(&server);
    let handle = JobHandle::new("resp_1");

    let first = client.retrieve(&handle).await.unwrap();
    let second = client.retrieve(&handle).await.unwrap();

    assert_eq!(first.status, JobStatus::InProgress);
    assert!(first.output.is_none());
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.output.unwrap().text, "{\"dimensions\": {}}");
    assert_eq!(server.requests_to("/v1/responses/resp_1")[0].method, "GET");
}

/// Test: a stream dropped after creation is recovered by polling the job
#[tokio::test]
async fn test_orchestrator_recovers_dropped_stream_by_polling() {
    let body = [
        sse_frame(r#"{"type":"response.created","response":{"id":"resp_1","status":"queued"}}"#),
        sse_frame(r#"{"type":"response.output_text.delta","delta":"partial"}"#),
    ]
    .concat();
    let server = MockServer::start(vec![
        ("/v1/responses", vec![Canned::event_stream(body).cut_short()]),
        ("/v1/responses/resp_1", vec![Canned::json(200, COMPLETED_RESPONSE)]),
    ])
    .await;
    let client = responses(&server);
    let config = SynthesisConfig::default().with_poll_interval(Duration::from_secs(1));
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&client, &config, &cancel, &NoopObserver);

    let result = orchestrator
        .run("gap_fill", &SynthesisRequest::streamed("dev", "user"))
        .await
        .unwrap();

    assert_eq!(result.final_state, SynthesisState::Completed);
    assert_eq!(result.outcome, SynthesisOutcome::Completed);
    assert_eq!(result.text, "{\"dimensions\": {}}");
    assert_eq!(server.requests_to("/v1/responses/resp_1").len(), 1);
}

/// Test: clients refuse to build without an API key
#[test]
fn test_missing_keys_fail_at_construction() {
    assert!(matches!(
        ResponsesConfig::from_lookup(|_| None),
        Err(ProviderError::MissingApiKey {
            env_var: "OPENAI_API_KEY",
            ..
        })
    ));
    assert!(matches!(
        TavilyConfig::from_lookup(|_| None),
        Err(ProviderError::MissingApiKey {
            env_var: "TAVILY_API_KEY",
            ..
        })
    ));
    assert!(matches!(
        AnthropicConfig::from_lookup(|_| None),
        Err(ProviderError::MissingApiKey {
            env_var: "ANTHROPIC_API_KEY",
            ..
        })
    ));
}

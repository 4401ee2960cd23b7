//! Synthesis orchestrator behavior under paused tokio time.
//!
//! Covers the stream-to-poll fallback, the wall-clock cap, retry
//! classification on retrieval, create failures, cancellation and activity
//! throttling, all against the scripted in-memory service.

use std::time::Duration;

use dossier_core::fakes::{RecordingObserver, ScriptedSynthesis, StreamStep};
use dossier_core::{
    CancelHandle, CancelSignal, JobHandle, JobSnapshot, JobStatus, NoopObserver, ProgressEvent, ServiceError,
    SynthesisConfig, SynthesisEvent, SynthesisOrchestrator, SynthesisOutcome, SynthesisOutput, SynthesisRequest,
    SynthesisState,
};
use tokio::time::Instant;

fn request() -> SynthesisRequest {
    SynthesisRequest::streamed("developer", "user").with_web_search(20)
}

fn created() -> StreamStep {
    StreamStep::Event(SynthesisEvent::Created {
        handle: JobHandle::new("resp_abc"),
    })
}

fn delta(text: &str) -> StreamStep {
    StreamStep::Event(SynthesisEvent::TextDelta(text.to_string()))
}

fn output(text: &str) -> SynthesisOutput {
    SynthesisOutput {
        text: text.to_string(),
        search_count: 3,
        ..Default::default()
    }
}

/// Test: a stream that reaches its terminal event completes without polling
#[tokio::test(start_paused = true)]
async fn test_stream_completes_without_polling() {
    let service = ScriptedSynthesis::new().with_stream(vec![
        created(),
        delta("{\"dim"),
        StreamStep::Event(SynthesisEvent::Completed(output("{\"dimensions\": {}}"))),
    ]);
    let config = SynthesisConfig::default();
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let result = orchestrator.run("test", &request()).await.unwrap();

    assert_eq!(result.outcome, SynthesisOutcome::Completed);
    assert_eq!(result.final_state, SynthesisState::Completed);
    assert_eq!(result.text, "{\"dimensions\": {}}");
    assert_eq!(result.search_count, 3);
    assert_eq!(service.retrieves(), 0);
    assert!(service.requests()[0].background);
}

/// Test: a broken stream with a known handle falls back to polling every interval
#[tokio::test(start_paused = true)]
async fn test_stream_lost_falls_back_to_polling() {
    let service = ScriptedSynthesis::new()
        .with_stream(vec![
            created(),
            delta("partial "),
            StreamStep::Error(ServiceError::network("synthesis", "connection reset")),
        ])
        .with_poll(Ok(JobSnapshot::pending(JobStatus::InProgress)))
        .with_poll(Ok(JobSnapshot::completed(output("final text"))));
    let config = SynthesisConfig::default();
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let start = Instant::now();
    let result = orchestrator.run("test", &request()).await.unwrap();

    assert_eq!(result.final_state, SynthesisState::Completed);
    assert_eq!(result.outcome, SynthesisOutcome::Completed);
    assert_eq!(result.text, "final text");
    assert_eq!(service.retrieves(), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
}

/// Test: a stream that ends without ever yielding a handle fails, keeping partial text
#[tokio::test(start_paused = true)]
async fn test_stream_lost_without_handle_fails() {
    let service = ScriptedSynthesis::new().with_stream(vec![delta("some text")]);
    let config = SynthesisConfig::default();
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let result = orchestrator.run("test", &request()).await.unwrap();

    assert_eq!(result.final_state, SynthesisState::Failed);
    assert!(matches!(result.outcome, SynthesisOutcome::Partial { .. }));
    assert_eq!(result.text, "some text");
    assert_eq!(service.retrieves(), 0);
}

/// Test: a hanging stream is cut off at the wall-clock cap with its partial text
#[tokio::test(start_paused = true)]
async fn test_cap_returns_partial_text_from_stream() {
    let service = ScriptedSynthesis::new().with_stream(vec![created(), delta("half a dossier"), StreamStep::Hang]);
    let config = SynthesisConfig::default();
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let start = Instant::now();
    let result = orchestrator.run("test", &request()).await.unwrap();

    assert_eq!(result.final_state, SynthesisState::TimeCapped);
    assert!(matches!(result.outcome, SynthesisOutcome::Partial { .. }));
    assert_eq!(result.text, "half a dossier");
    assert!(start.elapsed() <= config.wall_clock_cap() + config.poll_interval());
}

/// Test: polling that never reaches a terminal status stops within cap + one interval
#[tokio::test(start_paused = true)]
async fn test_cap_bounds_polling() {
    let service = ScriptedSynthesis::new()
        .with_stream(vec![created()])
        .with_poll(Ok(JobSnapshot::pending(JobStatus::InProgress)));
    let config = SynthesisConfig::default().with_wall_clock_cap(Duration::from_secs(95));
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let start = Instant::now();
    let result = orchestrator.run("test", &request()).await.unwrap();

    assert_eq!(result.final_state, SynthesisState::TimeCapped);
    assert!(matches!(result.outcome, SynthesisOutcome::Degraded { .. }));
    assert!(result.text.is_empty());
    assert!(start.elapsed() <= Duration::from_secs(95) + config.poll_interval());
    assert_eq!(service.retrieves(), 9);
}

/// Test: a 4xx on retrieval is not retried
#[tokio::test(start_paused = true)]
async fn test_retrieve_client_error_not_retried() {
    let service = ScriptedSynthesis::new()
        .with_stream(vec![created()])
        .with_poll(Err(ServiceError::http("synthesis", 404, "no such response")));
    let config = SynthesisConfig::default();
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let result = orchestrator.run("test", &request()).await.unwrap();

    assert_eq!(service.retrieves(), 1);
    assert_eq!(result.final_state, SynthesisState::Failed);
    assert!(matches!(result.outcome, SynthesisOutcome::Degraded { ref reason } if reason.contains("retrieve failed")));
}

/// Test: 429 and 5xx on retrieval are retried with backoff up to three attempts
#[tokio::test(start_paused = true)]
async fn test_retrieve_transient_errors_retried() {
    let service = ScriptedSynthesis::new()
        .with_stream(vec![created()])
        .with_poll(Err(ServiceError::http("synthesis", 429, "slow down")))
        .with_poll(Err(ServiceError::http("synthesis", 503, "unavailable")))
        .with_poll(Ok(JobSnapshot::completed(output("done"))));
    let config = SynthesisConfig::default();
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let start = Instant::now();
    let result = orchestrator.run("test", &request()).await.unwrap();

    assert_eq!(service.retrieves(), 3);
    assert_eq!(result.outcome, SynthesisOutcome::Completed);
    // One poll interval, then backoff of 2s and 4s.
    assert_eq!(start.elapsed(), Duration::from_secs(16));
}

/// Test: a failing create call is not retried and degrades the result
#[tokio::test(start_paused = true)]
async fn test_create_failure_degrades() {
    let service = ScriptedSynthesis::new().with_create_error(ServiceError::http("synthesis", 500, "boom"));
    let config = SynthesisConfig::default();
    let cancel = CancelSignal::never();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let result = orchestrator.run("test", &request()).await.unwrap();

    assert_eq!(service.creates(), 1);
    assert_eq!(result.final_state, SynthesisState::Failed);
    assert!(matches!(result.outcome, SynthesisOutcome::Degraded { .. }));
}

/// Test: cancellation during streaming returns a distinct Cancelled error
#[tokio::test(start_paused = true)]
async fn test_cancel_while_streaming() {
    let service = ScriptedSynthesis::new().with_stream(vec![created(), StreamStep::Hang]);
    let config = SynthesisConfig::default();
    let (handle, cancel) = CancelHandle::new();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let req = request();
    let (result, ()) = tokio::join!(orchestrator.run("test", &req), async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.cancel();
    });

    assert!(result.unwrap_err().is_cancelled());
}

/// Test: cancellation during the poll sleep stops before the next retrieve
#[tokio::test(start_paused = true)]
async fn test_cancel_while_polling() {
    let service = ScriptedSynthesis::new()
        .with_stream(vec![created()])
        .with_poll(Ok(JobSnapshot::pending(JobStatus::Queued)));
    let config = SynthesisConfig::default();
    let (handle, cancel) = CancelHandle::new();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, &NoopObserver);

    let req = request();
    let (result, ()) = tokio::join!(orchestrator.run("test", &req), async {
        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.cancel();
    });

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(service.retrieves(), 2);
}

/// Test: activity snapshots reach the observer at most once per throttle window
#[tokio::test(start_paused = true)]
async fn test_activity_is_throttled() {
    let mut steps = vec![created()];
    for i in 0..10 {
        steps.push(StreamStep::Event(SynthesisEvent::SearchStarted {
            query: Some(format!("query {i}")),
        }));
        steps.push(StreamStep::Delay(Duration::from_secs(1)));
    }
    steps.push(StreamStep::Event(SynthesisEvent::Completed(output("{}"))));
    let service = ScriptedSynthesis::new().with_stream(steps);
    let config = SynthesisConfig::default();
    let cancel = CancelSignal::never();
    let observer = RecordingObserver::shared();
    let orchestrator = SynthesisOrchestrator::new(&service, &config, &cancel, observer.as_ref());

    let result = orchestrator.run("test", &request()).await.unwrap();

    let snapshots: Vec<_> = observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ProgressEvent::Activity { snapshot, .. } => Some(snapshot),
            _ => None,
        })
        .collect();
    assert!(!snapshots.is_empty());
    assert!(snapshots.len() <= 4, "got {} snapshots", snapshots.len());
    assert!(snapshots.windows(2).all(|w| w[1].elapsed_secs >= w[0].elapsed_secs + 3));
    assert_eq!(result.activity.searches, 10);
    assert_eq!(result.activity.recent_queries.len(), 5);
}

//! Drives one long-running synthesis call from launch to a terminal state.
//!
//! The call is launched background-capable with a live stream. If the stream
//! breaks before a terminal event and a job handle is known, the
//! orchestrator falls back to polling that handle. One wall-clock deadline
//! bounds both modes. All text produced along the way lands in a single
//! partial-output buffer so every path converges on [`SynthesisResult`].

use std::time::Duration;

use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelSignal;
use crate::config::SynthesisConfig;
use crate::error::{DossierError, DossierResult};
use crate::obs;
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::providers::{
    Citation, JobHandle, JobStatus, SynthesisEvent, SynthesisOutput, SynthesisRequest, SynthesisService,
    SynthesisStream, TokenUsage,
};
use crate::retry::with_retry;

use super::activity::{ActivitySnapshot, ActivityTracker};
use super::state::{Signal, SynthesisState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynthesisOutcome {
    Completed,
    /// Usable text, but the call did not finish cleanly.
    Partial { reason: String },
    /// Nothing usable; downstream stages get an empty contribution.
    Degraded { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisResult {
    pub text: String,
    pub citations: Vec<Citation>,
    pub search_count: u32,
    pub usage: TokenUsage,
    pub outcome: SynthesisOutcome,
    pub final_state: SynthesisState,
    pub activity: ActivitySnapshot,
    pub duration_ms: u64,
}

impl SynthesisResult {
    pub fn is_completed(&self) -> bool {
        self.outcome == SynthesisOutcome::Completed
    }
}

/// How a stream or poll phase ended.
enum PhaseEnd {
    Done(SynthesisOutput),
    Failed(String),
    Lost(String),
    CapReached,
}

pub struct SynthesisOrchestrator<'a> {
    service: &'a dyn SynthesisService,
    config: &'a SynthesisConfig,
    cancel: &'a CancelSignal,
    observer: &'a dyn ProgressObserver,
}

struct Run<'r> {
    label: &'r str,
    state: SynthesisState,
    partial: String,
    handle: Option<JobHandle>,
    tracker: ActivityTracker,
    started: Instant,
    deadline: Instant,
}

impl Run<'_> {
    fn transition(&mut self, signal: Signal) -> DossierResult<()> {
        let next = self.state.next(signal)?;
        obs::emit_synthesis_transition(self.label, self.state.as_str(), next.as_str());
        self.state = next;
        Ok(())
    }
}

impl<'a> SynthesisOrchestrator<'a> {
    pub fn new(
        service: &'a dyn SynthesisService,
        config: &'a SynthesisConfig,
        cancel: &'a CancelSignal,
        observer: &'a dyn ProgressObserver,
    ) -> Self {
        SynthesisOrchestrator {
            service,
            config,
            cancel,
            observer,
        }
    }

    /// Run `request` to a terminal state.
    ///
    /// Only cancellation is an error; failures and the wall-clock cap become
    /// a partial or degraded result.
    #[instrument(skip_all, fields(label = %label))]
    pub async fn run(&self, label: &str, request: &SynthesisRequest) -> DossierResult<SynthesisResult> {
        let started = Instant::now();
        let mut run = Run {
            label,
            state: SynthesisState::Streaming,
            partial: String::new(),
            handle: None,
            tracker: ActivityTracker::new(started, self.config.activity_throttle()),
            started,
            deadline: started + self.config.wall_clock_cap(),
        };

        let end = match self.stream_phase(&mut run, request).await {
            Ok(end) => end,
            Err(e) => return self.abort(&mut run, e),
        };

        let end = match end {
            PhaseEnd::Lost(reason) if run.handle.is_some() => {
                warn!(event = "synthesis.stream_lost", label = %label, reason = %reason);
                run.transition(Signal::StreamLost)?;
                match self.poll_phase(&mut run).await {
                    Ok(end) => end,
                    Err(e) => return self.abort(&mut run, e),
                }
            }
            PhaseEnd::Lost(reason) => PhaseEnd::Failed(format!("stream ended without a job handle: {reason}")),
            other => other,
        };

        let polling = run.state == SynthesisState::Polling;
        let result = match end {
            PhaseEnd::Done(output) => {
                run.transition(if polling { Signal::PollCompleted } else { Signal::StreamCompleted })?;
                self.finish(&mut run, Some(output), SynthesisOutcome::Completed)
            }
            PhaseEnd::Failed(reason) | PhaseEnd::Lost(reason) => {
                run.transition(if polling { Signal::PollFailed } else { Signal::StreamFailed })?;
                let outcome = degrade(&run.partial, reason);
                self.finish(&mut run, None, outcome)
            }
            PhaseEnd::CapReached => {
                run.transition(Signal::CapReached)?;
                let reason = format!(
                    "wall-clock cap of {}s reached",
                    self.config.wall_clock_cap().as_secs()
                );
                let outcome = degrade(&run.partial, reason);
                self.finish(&mut run, None, outcome)
            }
        };
        Ok(result)
    }

    async fn stream_phase(&self, run: &mut Run<'_>, request: &SynthesisRequest) -> DossierResult<PhaseEnd> {
        self.cancel.check()?;

        // Launching is not idempotent, so it is never retried.
        let mut stream: Box<dyn SynthesisStream> =
            match timeout_at(run.deadline, self.cancel.run(self.service.create(request))).await {
                Err(_) => return Ok(PhaseEnd::CapReached),
                Ok(cancelled_or_created) => match cancelled_or_created? {
                    Ok(stream) => stream,
                    Err(e) => return Ok(PhaseEnd::Failed(e.to_string())),
                },
            };

        loop {
            let next = match timeout_at(run.deadline, self.cancel.run(stream.next_event())).await {
                Err(_) => return Ok(PhaseEnd::CapReached),
                Ok(next) => next?,
            };

            let event = match next {
                None => return Ok(PhaseEnd::Lost("stream closed before a terminal event".to_string())),
                Some(Err(e)) => return Ok(PhaseEnd::Lost(e.to_string())),
                Some(Ok(event)) => event,
            };

            run.tracker.record(&event);
            match event {
                SynthesisEvent::Created { handle } => {
                    debug!(label = %run.label, handle = %handle, "synthesis job created");
                    run.handle = Some(handle);
                }
                SynthesisEvent::TextDelta(delta) => run.partial.push_str(&delta),
                SynthesisEvent::Completed(output) => return Ok(PhaseEnd::Done(output)),
                SynthesisEvent::Failed { message } => return Ok(PhaseEnd::Failed(message)),
                SynthesisEvent::Incomplete { reason } => {
                    return Ok(PhaseEnd::Failed(format!("incomplete: {reason}")))
                }
                SynthesisEvent::SearchStarted { .. }
                | SynthesisEvent::PageVisited { .. }
                | SynthesisEvent::ReasoningStep { .. }
                | SynthesisEvent::Other => {}
            }
            self.report_activity(run);
        }
    }

    async fn poll_phase(&self, run: &mut Run<'_>) -> DossierResult<PhaseEnd> {
        let Some(handle) = run.handle.clone() else {
            return Ok(PhaseEnd::Failed("no job handle to poll".to_string()));
        };

        loop {
            let now = Instant::now();
            if now >= run.deadline {
                return Ok(PhaseEnd::CapReached);
            }
            let wait = self.config.poll_interval().min(run.deadline - now);
            self.cancel.sleep(wait).await?;
            if Instant::now() >= run.deadline {
                return Ok(PhaseEnd::CapReached);
            }

            let retrieved = timeout_at(
                run.deadline,
                with_retry("synthesis.retrieve", &self.config.retry, self.cancel, |_| {
                    self.service.retrieve(&handle)
                }),
            )
            .await;

            let snapshot = match retrieved {
                Err(_) => return Ok(PhaseEnd::CapReached),
                Ok(Err(DossierError::Service(e))) => return Ok(PhaseEnd::Failed(format!("retrieve failed: {e}"))),
                Ok(Err(other)) => return Err(other),
                Ok(Ok(snapshot)) => snapshot,
            };

            debug!(label = %run.label, status = ?snapshot.status, "synthesis poll");
            if let Some(text) = snapshot.output.as_ref().map(|o| &o.text) {
                if text.chars().count() > run.partial.chars().count() {
                    run.partial = text.clone();
                    run.tracker.raise_chars(text.chars().count());
                }
            }
            self.report_activity(run);

            match snapshot.status {
                JobStatus::Completed => {
                    return Ok(PhaseEnd::Done(snapshot.output.unwrap_or_default()));
                }
                JobStatus::Failed | JobStatus::Cancelled | JobStatus::Incomplete => {
                    let reason = snapshot
                        .error
                        .unwrap_or_else(|| format!("job ended with status {:?}", snapshot.status));
                    return Ok(PhaseEnd::Failed(reason));
                }
                JobStatus::Queued | JobStatus::InProgress => {}
            }
        }
    }

    fn report_activity(&self, run: &mut Run<'_>) {
        if let Some(snapshot) = run.tracker.poll_snapshot() {
            self.observer.on_event(ProgressEvent::Activity {
                label: run.label.to_string(),
                snapshot,
            });
        }
    }

    fn abort(&self, run: &mut Run<'_>, err: DossierError) -> DossierResult<SynthesisResult> {
        if err.is_cancelled() && !run.state.is_terminal() {
            run.transition(Signal::Cancel)?;
        }
        Err(err)
    }

    fn finish(&self, run: &mut Run<'_>, output: Option<SynthesisOutput>, outcome: SynthesisOutcome) -> SynthesisResult {
        let duration_ms = elapsed_ms(run.started.elapsed());
        let SynthesisOutput {
            text,
            citations,
            search_count,
            usage,
        } = output.unwrap_or_default();
        let text = if text.trim().is_empty() {
            std::mem::take(&mut run.partial)
        } else {
            text
        };
        let activity = run.tracker.snapshot();
        let search_count = search_count.max(activity.searches);

        match &outcome {
            SynthesisOutcome::Completed => info!(
                event = "synthesis.finished",
                label = %run.label,
                state = %run.state,
                chars = text.len(),
                searches = search_count,
                duration_ms = duration_ms,
            ),
            SynthesisOutcome::Partial { reason } | SynthesisOutcome::Degraded { reason } => warn!(
                event = "synthesis.degraded",
                label = %run.label,
                state = %run.state,
                chars = text.len(),
                reason = %reason,
                duration_ms = duration_ms,
            ),
        }

        SynthesisResult {
            text,
            citations,
            search_count,
            usage,
            outcome,
            final_state: run.state,
            activity,
            duration_ms,
        }
    }
}

fn degrade(partial: &str, reason: String) -> SynthesisOutcome {
    if partial.trim().is_empty() {
        SynthesisOutcome::Degraded { reason }
    } else {
        SynthesisOutcome::Partial { reason }
    }
}

fn elapsed_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

//! Cooperative cancellation threaded through a pipeline run.
//!
//! A [`CancelHandle`] owned by the caller flips a `watch` channel; every
//! [`CancelSignal`] clone observes it at fetch, batch, poll and retry
//! boundaries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{DossierError, DossierResult};

/// Caller-side trigger.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx: Some(rx) })
    }

    pub fn cancel(&self) {
        // send_replace never fails, even with no live receivers.
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Observer side, cheap to clone and pass down.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        CancelSignal { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> DossierResult<()> {
        if self.is_cancelled() {
            Err(DossierError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested; pends forever otherwise.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling: nothing can fire anymore.
                return std::future::pending().await;
            }
        }
    }

    /// Sleep that wakes early with `Err(Cancelled)`.
    pub async fn sleep(&self, duration: Duration) -> DossierResult<()> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DossierError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Race `fut` against cancellation, abandoning it when the signal fires.
    pub async fn run<F: Future>(&self, fut: F) -> DossierResult<F::Output> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DossierError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_signal_is_not_cancelled() {
        let s = CancelSignal::never();
        assert!(!s.is_cancelled());
        assert!(s.check().is_ok());
    }

    #[test]
    fn test_cancel_is_observed_by_all_clones() {
        let (handle, signal) = CancelHandle::new();
        let other = signal.clone();
        let late = handle.signal();
        handle.cancel();
        assert!(signal.is_cancelled());
        assert!(other.is_cancelled());
        assert!(late.is_cancelled());
        assert!(matches!(signal.check(), Err(DossierError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_wakes_on_cancel() {
        let (handle, signal) = CancelHandle::new();
        let start = tokio::time::Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.cancel();
        });
        let result = signal.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(DossierError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_run_returns_output_when_not_cancelled() {
        let out = CancelSignal::never().run(async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }
}

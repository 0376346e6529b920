//! Clocks and evaluation deadlines.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{PlacementError, PlacementResult};

/// Source of wall-clock time in epoch milliseconds.
///
/// Injected into the engine so that override expiry and decision
/// timestamps are reproducible under test.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A manually driven clock.
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicU64,
}

impl FixedClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Caller-supplied bound on one evaluation: a point in time plus an
/// optional cancellation signal (`true` means cancel).
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: Option<watch::Receiver<bool>>,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            cancel: None,
        }
    }

    pub fn at(at: Instant) -> Self {
        Self { at, cancel: None }
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fail fast if the evaluation should stop now.
    pub fn check(&self) -> PlacementResult<()> {
        if self.is_cancelled() {
            return Err(PlacementError::Cancelled);
        }
        if Instant::now() >= self.at {
            return Err(PlacementError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Race `fut` against the deadline and the cancellation signal.
    pub async fn run<F>(&self, fut: F) -> PlacementResult<F::Output>
    where
        F: Future,
    {
        self.check()?;
        let mut cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Err(PlacementError::Cancelled),
            _ = tokio::time::sleep_until(self.at) => Err(PlacementError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

async fn cancelled(rx: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: cancellation can no longer happen.
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(1_000);
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_millis(), 42);
    }

    #[test]
    fn system_clock_is_recent() {
        // After 2024-01-01.
        assert!(SystemClock.now_millis() > 1_704_067_200_000);
    }

    #[tokio::test]
    async fn run_completes_before_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let out = deadline.run(async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result = deadline
            .run(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(matches!(result, Err(PlacementError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn run_observes_cancellation() {
        let (tx, rx) = watch::channel(false);
        let deadline = Deadline::after(Duration::from_secs(60)).with_cancellation(rx);
        let handle = tokio::spawn(async move {
            deadline
                .run(tokio::time::sleep(Duration::from_secs(30)))
                .await
        });
        tx.send(true).unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(PlacementError::Cancelled)));
    }

    #[test]
    fn check_reports_prior_cancellation() {
        let (tx, rx) = watch::channel(false);
        let deadline = Deadline::after(Duration::from_secs(60)).with_cancellation(rx);
        assert!(deadline.check().is_ok());
        tx.send(true).unwrap();
        assert!(matches!(deadline.check(), Err(PlacementError::Cancelled)));
    }
}

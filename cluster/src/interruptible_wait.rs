use once_cell::sync::OnceCell;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How an [`InterruptibleWait`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration elapsed
    Elapsed,
    /// Someone asked for the wait to end early
    Interrupted,
    /// The owning monitor is shutting down
    Cancelled,
}

/// A delay that ends when its duration elapses or when it is interrupted.
///
/// The clock starts at construction. An interrupt never ends the wait before
/// `minimum` has passed since construction, which bounds how often callers
/// can force a re-probe. Interrupting is idempotent. Once the wait has
/// completed, its outcome is fixed and later interrupts are ignored.
#[derive(Debug)]
pub struct InterruptibleWait {
    started: Instant,
    duration: Duration,
    minimum: Duration,
    interrupt: watch::Sender<bool>,
    outcome: OnceCell<WaitOutcome>,
}

impl InterruptibleWait {
    pub fn new(duration: Duration) -> Self {
        Self::with_minimum(duration, Duration::ZERO)
    }

    pub fn with_minimum(duration: Duration, minimum: Duration) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            started: Instant::now(),
            duration,
            minimum: minimum.min(duration),
            interrupt,
            outcome: OnceCell::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.duration
    }

    /// End the wait early. No-op once the wait has elapsed or finished.
    pub fn interrupt(&self) {
        if self.outcome.get().is_some() || Instant::now() >= self.deadline() {
            return;
        }
        self.interrupt.send_replace(true);
    }

    /// How the wait ended, if it has
    pub fn outcome(&self) -> Option<WaitOutcome> {
        self.outcome.get().copied()
    }

    pub fn is_interrupted(&self) -> bool {
        *self.interrupt.borrow()
    }

    /// Wait until the deadline, an interrupt, or cancellation, whichever
    /// comes first. Cancellation is never reported as `Elapsed`.
    pub async fn wait(&self, cancel: &CancellationToken) -> WaitOutcome {
        if let Some(outcome) = self.outcome() {
            return outcome;
        }
        let mut interrupted = self.interrupt.subscribe();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            _ = wait_for_interrupt(&mut interrupted) => {}
            _ = tokio::time::sleep_until(self.deadline()) => return self.complete(WaitOutcome::Elapsed),
        }

        let earliest = self.started + self.minimum;
        if earliest > Instant::now() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = tokio::time::sleep_until(earliest) => {}
            }
        }

        self.complete(WaitOutcome::Interrupted)
    }

    // The first outcome sticks, even with several waiters racing
    fn complete(&self, outcome: WaitOutcome) -> WaitOutcome {
        *self.outcome.get_or_init(|| outcome)
    }
}

async fn wait_for_interrupt(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: no interrupt can ever arrive
            std::future::pending::<()>().await;
        }
    }
}

// ── Scheduled tasks ──
//
// Cancellable background timers. Every handle owns a child of the
// caller's `CancellationToken`, so cancelling the bridge stops every
// schedule it started without tracking them individually.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Smallest accepted period; `tokio::time::interval` panics on zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Whether an interval task fires immediately or waits one period first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstRun {
    Immediately,
    AfterPeriod,
}

/// Handle to a spawned scheduled task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "scheduled task did not exit cleanly");
        }
    }
}

/// Run `task` every `period` until cancelled.
///
/// A run that is still in progress when the next tick is due delays the
/// schedule rather than bursting to catch up.
pub fn spawn_interval<F, Fut>(
    parent: &CancellationToken,
    name: &'static str,
    period: Duration,
    first: FirstRun,
    mut task: F,
) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = parent.child_token();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if first == FirstRun::AfterPeriod {
            interval.tick().await; // consume the immediate first tick
        }

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = interval.tick() => task().await,
            }
        }
        debug!(task = name, "scheduled task stopped");
    });

    TaskHandle {
        name,
        cancel,
        handle,
    }
}

/// Run `task` once after `delay` unless cancelled first.
pub fn spawn_after<Fut>(
    parent: &CancellationToken,
    name: &'static str,
    delay: Duration,
    task: Fut,
) -> TaskHandle
where
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = parent.child_token();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        tokio::select! {
            biased;
            () = token.cancelled() => debug!(task = name, "one-shot task cancelled"),
            () = tokio::time::sleep(delay) => task.await,
        }
    });

    TaskHandle {
        name,
        cancel,
        handle,
    }
}

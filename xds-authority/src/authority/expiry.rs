//! One-shot expiry timer for pending subscriptions.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::runtime::Runtime;

/// A cancellable one-shot timer.
///
/// Dropping the handle cancels the timer; the spawned task then exits
/// without running the expiry callback. Cancelling a timer that already
/// fired is a benign no-op. The watch registry owns exactly one of these
/// per entry in the `Requested` state.
pub(crate) struct ExpiryTimer {
    _cancel: oneshot::Sender<()>,
}

impl ExpiryTimer {
    /// Spawn a timer that runs `on_expiry` after `after`, unless the
    /// returned handle is dropped first.
    pub(crate) fn spawn<R, F>(runtime: &R, after: Duration, on_expiry: F) -> Self
    where
        R: Runtime,
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        // The deadline is fixed here, not at the task's first poll.
        let sleep = runtime.sleep(after);
        runtime.spawn(async move {
            tokio::select! {
                _ = sleep => on_expiry(),
                _ = cancel_rx => {}
            }
        });
        Self { _cancel: cancel_tx }
    }
}

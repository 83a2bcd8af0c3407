//! Async runtime abstraction.

use std::future::Future;
use std::time::Duration;

#[cfg(feature = "rt-tokio")]
pub mod tokio;

/// The runtime operations the authority needs: spawning background tasks
/// and sleeping. Everything else (timers, the callback serializer, the
/// stream coordinator) is built on these two, which keeps the state machine
/// runtime-agnostic.
pub trait Runtime: Send + Sync + Clone + 'static {
    /// Spawn a future to run in the background.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Sleep for the given duration.
    ///
    /// The deadline is fixed when the future is created, not when it is
    /// first polled, so a caller can create the future and hand it to a
    /// task that starts later.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static;
}

//! Serial execution of watcher callbacks.

use tokio::sync::mpsc;

use crate::runtime::Runtime;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A serial task queue: many producers enqueue closures, a single drain task
/// executes them strictly in submission order, never concurrently.
///
/// The watch registry schedules every watcher notification here, inside the
/// same locked transition that decides it. Slow or reentrant watcher code
/// therefore never stalls stream processing or another registration; it only
/// delays later notifications, preserving per-resource ordering.
#[derive(Clone)]
pub struct CallbackSerializer {
    tx: mpsc::UnboundedSender<Job>,
}

impl CallbackSerializer {
    /// Create a serializer and spawn its drain task on `runtime`.
    ///
    /// The drain task exits once every handle to the serializer is dropped
    /// and all scheduled callbacks have run.
    pub fn new<R: Runtime>(runtime: &R) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self { tx }
    }

    /// Schedule `job` to run after all previously scheduled jobs.
    ///
    /// Never blocks. Returns false if the drain task is gone, in which case
    /// `job` is dropped without running.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

impl std::fmt::Debug for CallbackSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSerializer").finish_non_exhaustive()
    }
}

//! Watcher interface and the cancellation handle returned by
//! [`Authority::watch_resource`](crate::Authority::watch_resource).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::authority::registry::WatchRegistry;
use crate::authority::worker::WorkerCommand;
use crate::error::Error;
use crate::resource::{DecodedResource, ResourceType};

/// Global counter for generating unique watcher IDs.
static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    pub(crate) fn next() -> Self {
        Self(NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives notifications for one watched resource.
///
/// Callbacks are delivered on the authority's callback serializer: strictly
/// one at a time, in the order the underlying transitions occurred for the
/// resource. Implementations may block or re-enter the authority without
/// stalling stream processing.
pub trait ResourceWatcher: Send + Sync + 'static {
    /// A new version of the resource was received and decoded.
    fn on_update(&self, resource: DecodedResource);

    /// The watch hit an error: the connection broke while the resource was
    /// pending, or no response arrived within the watch expiry.
    fn on_error(&self, error: Error);

    /// The server authoritatively confirmed the resource does not exist.
    fn on_resource_does_not_exist(&self);
}

struct HandleInner {
    registry: Arc<WatchRegistry>,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    rtype: ResourceType,
    name: String,
    id: WatcherId,
}

/// Cancels one watch registration.
///
/// [`cancel`](WatchHandle::cancel) is idempotent and also runs on drop.
/// Cancellation removes this watcher immediately with respect to future
/// notifications; a notification already handed to the callback serializer
/// may still be delivered. It does not retract a request already sent to
/// the server.
pub struct WatchHandle {
    inner: Option<HandleInner>,
}

impl WatchHandle {
    pub(crate) fn new(
        registry: Arc<WatchRegistry>,
        commands: mpsc::UnboundedSender<WorkerCommand>,
        rtype: ResourceType,
        name: String,
        id: WatcherId,
    ) -> Self {
        Self {
            inner: Some(HandleInner {
                registry,
                commands,
                rtype,
                name,
                id,
            }),
        }
    }

    /// A handle that cancels nothing, returned once the authority is closed.
    pub(crate) fn inert() -> Self {
        Self { inner: None }
    }

    /// Remove this watcher. Subsequent calls are no-ops.
    pub fn cancel(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        if inner
            .registry
            .cancel_watch(&inner.rtype, &inner.name, inner.id)
        {
            // Last watcher for the name: tell the coordinator the name no
            // longer needs to be requested. Best effort; the worker may
            // already be gone on shutdown.
            let _ = inner.commands.send(WorkerCommand::UpdateSubscriptions {
                rtype: inner.rtype.clone(),
            });
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.inner.is_some())
            .finish()
    }
}

//! The discovery authority: one multiplexed ADS session and the watches
//! riding on it.
//!
//! An [`Authority`] binds the watch registry to a background stream
//! coordinator. Callers register interest in named resources through
//! [`watch_resource`](Authority::watch_resource); the coordinator keeps one
//! stream to the management server, folds every subscription into it, and
//! feeds responses, absences, timeouts, and connection errors back to the
//! watchers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::authority::config::AuthorityConfig;
use crate::authority::registry::WatchRegistry;
use crate::authority::retry::Backoff;
use crate::authority::watch::{ResourceWatcher, WatchHandle};
use crate::authority::worker::{AdsWorker, WorkerCommand};
use crate::error::Result;
use crate::resource::{ResourceType, TypeRegistry};
use crate::runtime::Runtime;
use crate::sync::CallbackSerializer;
use crate::transport::Transport;

pub mod config;
pub mod retry;
pub mod watch;

mod expiry;
mod registry;
mod worker;

#[cfg(test)]
pub(crate) mod test_util;

/// Builds an [`Authority`].
///
/// The caller supplies the four collaborators the authority is generic over:
/// the transport to the management server, the async runtime, the callback
/// serializer watcher notifications are delivered on, and the registry of
/// resource types this authority understands.
pub struct AuthorityBuilder<T, R> {
    config: AuthorityConfig,
    transport: T,
    runtime: R,
    serializer: CallbackSerializer,
    types: Arc<TypeRegistry>,
}

impl<T, R> AuthorityBuilder<T, R>
where
    T: Transport,
    R: Runtime,
{
    /// Create a builder from an authority's collaborators.
    pub fn new(
        config: AuthorityConfig,
        transport: T,
        runtime: R,
        serializer: CallbackSerializer,
        types: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            config,
            transport,
            runtime,
            serializer,
            types,
        }
    }

    /// Validate the configuration and start the authority.
    ///
    /// The stream coordinator is spawned immediately but does not connect
    /// until the first watch is registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration
    /// is invalid; nothing is spawned in that case.
    pub fn build(self) -> Result<Authority> {
        self.config.validate()?;

        let registry = WatchRegistry::new(self.serializer, self.config.watch_expiry);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let worker = AdsWorker::new(
            self.transport,
            self.runtime.clone(),
            Arc::clone(&registry),
            self.types,
            self.config.node,
            Backoff::new(self.config.retry_policy),
            command_rx,
        );
        self.runtime.spawn(worker.run());

        Ok(Authority {
            registry,
            command_tx,
            closed: AtomicBool::new(false),
        })
    }
}

/// One discovery session with one management server.
///
/// All watches registered here share a single ADS stream; see the
/// [crate docs](crate) for the protocol behavior. The authority is `Send +
/// Sync` and methods take `&self`, so it is typically wrapped in an `Arc`
/// and shared.
///
/// Dropping the authority closes it.
pub struct Authority {
    registry: Arc<WatchRegistry>,
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
    closed: AtomicBool,
}

impl Authority {
    /// Register a watcher for the resource `name` of type `rtype`.
    ///
    /// If this is the first watch for the name, a request enumerating the
    /// type's updated name set is sent on the stream (establishing the
    /// stream first if necessary). The watcher then receives exactly one of:
    /// an update, a does-not-exist notification, or an error (watch expiry
    /// or connection failure) — followed by further notifications as the
    /// resource changes or the stream fails, until the returned handle is
    /// cancelled.
    ///
    /// On a closed authority this logs and returns an inert handle; the
    /// watcher is never invoked.
    pub fn watch_resource(
        &self,
        rtype: &ResourceType,
        name: impl Into<String>,
        watcher: Arc<dyn ResourceWatcher>,
    ) -> WatchHandle {
        let name = name.into();
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                type_url = %rtype.type_url(),
                name = %name,
                "watch_resource called on closed authority"
            );
            return WatchHandle::inert();
        }

        let (id, first_watch) = self.registry.add_watch(rtype, &name, watcher);
        if first_watch {
            // Best effort: the worker is only gone once the authority is
            // closed, and then the subscription no longer matters.
            let _ = self.command_tx.send(WorkerCommand::UpdateSubscriptions {
                rtype: rtype.clone(),
            });
        }
        WatchHandle::new(
            Arc::clone(&self.registry),
            self.command_tx.clone(),
            rtype.clone(),
            name,
            id,
        )
    }

    /// Shut the authority down: the stream is dropped, reconnection stops,
    /// and every outstanding expiry timer is cancelled. Idempotent.
    ///
    /// Notifications already handed to the callback serializer may still be
    /// delivered after `close` returns.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing authority");
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        self.registry.cancel_all_timers();
    }
}

impl Drop for Authority {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

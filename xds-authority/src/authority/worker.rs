//! Stream coordinator: the background task owning the ADS stream lifecycle.
//!
//! The worker connects, (re-)subscribes, and translates transport signals
//! into registry transitions:
//! - successful stream establishment, or a successful `send`, is the
//!   on-send confirmation and marks the named resources requested;
//! - each decoded response applies one update per subscribed resource it
//!   names (or, for full-state types, authoritatively omits);
//! - any receive/send failure resets the registry and reconnects with
//!   exponential backoff, until the authority is closed.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::authority::registry::{WatchRegistry, WatchUpdate};
use crate::authority::retry::Backoff;
use crate::error::{Error, Result};
use crate::message::{DiscoveryRequest, DiscoveryResponse, Node};
use crate::resource::{DecodeResult, ResourceType, TypeRegistry};
use crate::runtime::Runtime;
use crate::transport::{Transport, TransportStream};

/// Commands from the authority (and watch handles) to the worker.
pub(crate) enum WorkerCommand {
    /// The subscribed-name set for a type changed; send a fresh request
    /// enumerating the current names. Applied on the next connection when
    /// the stream is down.
    UpdateSubscriptions {
        /// The type whose name set changed.
        rtype: ResourceType,
    },
    /// The authority is closing: drop the stream and do not reconnect.
    Shutdown,
}

pub(crate) struct AdsWorker<T, R> {
    transport: T,
    runtime: R,
    registry: Arc<WatchRegistry>,
    types: Arc<TypeRegistry>,
    node: Node,
    backoff: Backoff,
    command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
}

impl<T, R> AdsWorker<T, R>
where
    T: Transport,
    R: Runtime,
{
    pub(crate) fn new(
        transport: T,
        runtime: R,
        registry: Arc<WatchRegistry>,
        types: Arc<TypeRegistry>,
        node: Node,
        backoff: Backoff,
        command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    ) -> Self {
        Self {
            transport,
            runtime,
            registry,
            types,
            node,
            backoff,
            command_rx,
        }
    }

    /// Run until the authority shuts down.
    pub(crate) async fn run(mut self) {
        self.run_loop().await;
        // Commands that were queued ahead of Shutdown have all been drained
        // by now and may have armed timers after `close()` swept the
        // registry. Nothing transitions state once the worker is gone, so
        // this sweep is final.
        self.registry.cancel_all_timers();
    }

    async fn run_loop(&mut self) {
        loop {
            // Wait for at least one subscription before connecting: there is
            // nothing to request yet, and servers that hold response headers
            // until they see a request would deadlock an idle stream.
            while !self.registry.has_subscriptions() {
                match self.command_rx.recv().await {
                    Some(WorkerCommand::UpdateSubscriptions { .. }) => {}
                    Some(WorkerCommand::Shutdown) | None => return,
                }
            }

            // Subscription commands queued before this connect are already
            // satisfied by the initial request batch below; consume them so
            // they are not replayed as duplicate requests on the new stream.
            loop {
                match self.command_rx.try_recv() {
                    Ok(WorkerCommand::UpdateSubscriptions { .. }) => {}
                    Ok(WorkerCommand::Shutdown) => return,
                    Err(TryRecvError::Disconnected) => return,
                    Err(TryRecvError::Empty) => break,
                }
            }

            let subscriptions = self.registry.subscriptions();
            let initial: Vec<DiscoveryRequest> = subscriptions
                .iter()
                .map(|(rtype, names)| self.request(rtype, names.clone()))
                .collect();

            let stream = match self.transport.new_stream(initial).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!(error = %e, "failed to establish ADS stream");
                    if !self.backoff_or_shutdown().await {
                        return;
                    }
                    continue;
                }
            };
            tracing::debug!("ADS stream established");

            // Establishment confirmed the initial batch was handed to the
            // wire: every name in it is now formally requested.
            let mut active_types = HashSet::new();
            for (rtype, names) in &subscriptions {
                active_types.insert(rtype.type_url().to_string());
                self.registry.mark_requested(&self.runtime, rtype, names);
            }

            match self.run_connected(stream, active_types).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::debug!(error = %e, "ADS stream failed");
                    self.registry.handle_stream_error(&e);
                    if !self.backoff_or_shutdown().await {
                        return;
                    }
                }
            }
        }
    }

    /// Event loop while the stream is up.
    ///
    /// `Ok(())` means shut down; `Err` means the stream failed and the
    /// worker should reconnect.
    async fn run_connected<S: TransportStream>(
        &mut self,
        mut stream: S,
        mut active_types: HashSet<String>,
    ) -> Result<()> {
        let mut received_any = false;
        loop {
            tokio::select! {
                result = stream.recv() => match result {
                    Ok(Some(response)) => {
                        if !received_any {
                            received_any = true;
                            self.backoff.reset();
                        }
                        self.handle_response(response);
                    }
                    Ok(None) => return Err(Error::StreamClosed),
                    Err(e) => return Err(e),
                },

                cmd = self.command_rx.recv() => match cmd {
                    Some(WorkerCommand::UpdateSubscriptions { rtype }) => {
                        let names = self.registry.subscribed_names(&rtype);
                        if names.is_empty() && !active_types.contains(rtype.type_url()) {
                            // Nothing was ever requested for this type on
                            // this stream, so there is nothing to retract.
                            continue;
                        }
                        active_types.insert(rtype.type_url().to_string());
                        stream.send(self.request(&rtype, names.clone())).await?;
                        self.registry.mark_requested(&self.runtime, &rtype, &names);
                    }
                    Some(WorkerCommand::Shutdown) | None => return Ok(()),
                },
            }
        }
    }

    fn request(&self, rtype: &ResourceType, resource_names: Vec<String>) -> DiscoveryRequest {
        DiscoveryRequest {
            node: self.node.clone(),
            type_url: rtype.type_url().to_string(),
            resource_names,
        }
    }

    /// Apply one response to the registry.
    ///
    /// Decode failures cause no transition for the affected names: a
    /// malformed update must not poison resources that were previously
    /// healthy. For full-state types, a subscribed name that is neither
    /// decoded nor decode-failed in the response does not exist; a payload
    /// whose resources cannot even be enumerated suppresses that absence
    /// pass entirely.
    fn handle_response(&self, response: DiscoveryResponse) {
        let Some(rtype) = self.types.get(&response.type_url) else {
            tracing::warn!(
                type_url = %response.type_url,
                "ignoring response for unregistered resource type"
            );
            return;
        };
        tracing::debug!(
            type_url = %response.type_url,
            version = %response.version_info,
            nonce = %response.nonce,
            resources = response.resources.len(),
            "received discovery response"
        );

        let subscribed = self.registry.subscribed_names(rtype);
        let mut accounted: HashSet<String> = HashSet::new();
        let mut enumeration_failed = false;

        for resource in response.resources {
            match rtype.decode(resource) {
                DecodeResult::Resource(decoded) => {
                    let name = decoded.name().to_string();
                    self.registry
                        .apply_update(rtype, &name, WatchUpdate::Resource(decoded));
                    accounted.insert(name);
                }
                DecodeResult::ResourceError { name, error } => {
                    tracing::warn!(
                        type_url = %rtype.type_url(),
                        name = %name,
                        error = %error,
                        "dropping undecodable resource"
                    );
                    accounted.insert(name);
                }
                DecodeResult::TopLevelError(error) => {
                    tracing::warn!(
                        type_url = %rtype.type_url(),
                        error = %error,
                        "dropping resource with unextractable name"
                    );
                    enumeration_failed = true;
                }
            }
        }

        if rtype.full_state_on_wire() && !enumeration_failed {
            for name in subscribed {
                if !accounted.contains(&name) {
                    self.registry
                        .apply_update(rtype, &name, WatchUpdate::DoesNotExist);
                }
            }
        }
    }

    /// Sleep out the backoff while still draining commands.
    ///
    /// Returns false if the worker should shut down instead of reconnecting.
    async fn backoff_or_shutdown(&mut self) -> bool {
        let delay = self.backoff.next_backoff();
        tracing::debug!(?delay, "reconnecting after backoff");
        let sleep = self.runtime.sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.command_rx.recv() => match cmd {
                    // The registry already holds the new name set; it is
                    // picked up when the next stream is established.
                    Some(WorkerCommand::UpdateSubscriptions { .. }) => {}
                    Some(WorkerCommand::Shutdown) | None => return false,
                },
            }
        }
    }
}

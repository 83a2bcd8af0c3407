//! An xDS discovery client authority: resource watches multiplexed over a
//! single Aggregated Discovery Service (ADS) stream.
//!
//! An [`Authority`] represents one discovery session with one management
//! server. Callers register interest in named resources with
//! [`Authority::watch_resource`]; the authority folds every watch into one
//! bidirectional stream, decodes the responses through caller-supplied
//! [`ResourceType`]s, and delivers updates, authoritative absences, watch
//! timeouts, and connection errors to the registered [`ResourceWatcher`]s.
//!
//! Behavior highlights:
//!
//! - A watch's expiry clock starts only once a request naming the resource
//!   is confirmed sent, so an unreachable server does not burn timeouts.
//! - For full-state resource types, a response omitting a pending subscribed
//!   name is an authoritative does-not-exist notification.
//! - Stream failures notify only watchers still waiting for a response;
//!   delivered resources stand and are silently re-requested on reconnect.
//! - Reconnection uses exponential backoff ([`RetryPolicy`]) and continues
//!   until the authority is closed.
//! - All watcher callbacks are delivered serially, in transition order, on
//!   a [`CallbackSerializer`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use xds_authority::{
//!     AuthorityBuilder, AuthorityConfig, CallbackSerializer, Node, ServerConfig,
//!     TokioRuntime, TonicTransport, TypeRegistry,
//! };
//!
//! # async fn run(listener_type: xds_authority::ResourceType,
//! #              watcher: Arc<dyn xds_authority::ResourceWatcher>)
//! #              -> Result<(), Box<dyn std::error::Error>> {
//! let mut types = TypeRegistry::new();
//! types.register(listener_type.clone());
//!
//! let transport = TonicTransport::connect(&ServerConfig::new("http://[::1]:5678")).await?;
//! let authority = AuthorityBuilder::new(
//!     AuthorityConfig::new(Node::new("grpc", "1.0").with_id("my-node")),
//!     transport,
//!     TokioRuntime,
//!     CallbackSerializer::new(&TokioRuntime),
//!     Arc::new(types),
//! )
//! .build()?;
//!
//! let handle = authority.watch_resource(&listener_type, "example-listener", watcher);
//! # drop(handle);
//! # Ok(())
//! # }
//! ```

mod authority;
mod error;
mod message;
mod resource;
mod runtime;
mod sync;
mod transport;

pub use crate::authority::config::{AuthorityConfig, DEFAULT_WATCH_EXPIRY, ServerConfig};
pub use crate::authority::retry::{Backoff, RetryPolicy};
pub use crate::authority::watch::{ResourceWatcher, WatchHandle, WatcherId};
pub use crate::authority::{Authority, AuthorityBuilder};
pub use crate::error::{Error, Result};
pub use crate::message::{DiscoveryRequest, DiscoveryResponse, Locality, Node, ResourceAny};
pub use crate::resource::{
    DecodeResult, DecodedResource, Decoder, ResourceData, ResourceType, TypeRegistry,
};
pub use crate::sync::CallbackSerializer;
pub use crate::transport::{Transport, TransportStream};

pub use crate::runtime::Runtime;
#[cfg(feature = "rt-tokio")]
pub use crate::runtime::tokio::TokioRuntime;

#[cfg(feature = "transport-tonic")]
pub use crate::transport::tonic::{TonicAdsStream, TonicTransport};

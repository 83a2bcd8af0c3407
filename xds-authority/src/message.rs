//! Crate-owned discovery message types.
//!
//! These types are the boundary between the watch/stream coordination logic
//! and the transport. The transport converts them to and from the wire
//! format and owns wire-protocol state such as version and nonce tracking;
//! the values carried here on responses ride along for logging only.

use bytes::Bytes;

/// A discovery request naming the resources currently subscribed for a type.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    /// The node making the request.
    pub node: Node,
    /// Type URL of the resources being requested.
    pub type_url: String,
    /// Names of all resources currently subscribed for this type.
    pub resource_names: Vec<String>,
}

/// A discovery response from the management server.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResponse {
    /// Type URL of the resources in this response.
    pub type_url: String,
    /// The resources, each wrapped as an opaque Any payload.
    pub resources: Vec<ResourceAny>,
    /// Server version of this response. Acknowledged by the transport.
    pub version_info: String,
    /// Server nonce for this response. Acknowledged by the transport.
    pub nonce: String,
}

/// A resource wrapped as `google.protobuf.Any`.
#[derive(Debug, Clone)]
pub struct ResourceAny {
    /// Type URL of the resource.
    pub type_url: String,
    /// Serialized resource bytes.
    pub value: Bytes,
}

/// Node identification sent to the management server.
#[derive(Debug, Clone)]
pub struct Node {
    /// An opaque node identifier.
    pub id: Option<String>,
    /// The cluster the node belongs to.
    pub cluster: Option<String>,
    /// Locality specifying where the node is running.
    pub locality: Option<Locality>,
    /// Free-form string identifying the client type (e.g., "envoy", "grpc").
    pub user_agent_name: String,
    /// Version of the client.
    pub user_agent_version: String,
}

impl Node {
    /// Create a new node with the required user agent fields.
    pub fn new(user_agent_name: impl Into<String>, user_agent_version: impl Into<String>) -> Self {
        Self {
            id: None,
            cluster: None,
            locality: None,
            user_agent_name: user_agent_name.into(),
            user_agent_version: user_agent_version.into(),
        }
    }

    /// Set the node ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the cluster.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Set the locality.
    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = Some(locality);
        self
    }
}

/// Locality information identifying where a node is running.
#[derive(Debug, Clone, Default)]
pub struct Locality {
    /// Region the node is in.
    pub region: String,
    /// Zone within the region.
    pub zone: String,
    /// Sub-zone within the zone.
    pub sub_zone: String,
}

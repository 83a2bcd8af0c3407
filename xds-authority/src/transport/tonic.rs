//! `tonic` based transport implementation.
//!
//! Opens the ADS `StreamAggregatedResources` RPC over a tonic [`Channel`]
//! using tonic's low-level `Grpc` client with a pass-through bytes codec,
//! and converts between the crate-owned message types and the
//! `envoy.service.discovery.v3` wire messages via prost.
//!
//! The stream also owns the version/nonce bookkeeping the discovery protocol
//! requires: every response handed to the caller has already been
//! acknowledged with the server's version and nonce, echoing the resource
//! names of the most recent request for that type. The coordinator above
//! this layer never sees versions or nonces.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes};
use http::uri::PathAndQuery;
use prost::Message;
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::Channel;
use tonic::{Status, Streaming};

use envoy_types::pb::envoy::config::core::v3 as corepb;
use envoy_types::pb::envoy::service::discovery::v3 as xdspb;

use crate::authority::config::ServerConfig;
use crate::error::{Error, Result};
use crate::message::{DiscoveryRequest, DiscoveryResponse, Node, ResourceAny};
use crate::transport::{Transport, TransportStream};

/// The gRPC path for the ADS StreamAggregatedResources RPC.
const ADS_PATH: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources";

const ADS_CHANNEL_BUFFER_SIZE: usize = 16;

/// A codec that passes bytes through without serialization, so that
/// encoding/decoding of the discovery messages stays in this module.
#[derive(Debug, Clone, Copy)]
struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = BytesEncoder;
    type Decoder = BytesDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        BytesEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        BytesDecoder
    }
}

#[derive(Debug)]
struct BytesEncoder;

impl Encoder for BytesEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut EncodeBuf<'_>,
    ) -> std::result::Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }
}

#[derive(Debug)]
struct BytesDecoder;

impl Decoder for BytesDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }
}

/// Factory for ADS streams using tonic.
#[derive(Clone, Debug)]
pub struct TonicTransport {
    channel: Channel,
}

impl TonicTransport {
    /// Create a transport from an existing tonic [`Channel`].
    ///
    /// Use this for custom channel configuration (TLS, timeouts, etc.).
    ///
    /// # Example
    ///
    /// ```ignore
    /// use tonic::transport::{Certificate, Channel, ClientTlsConfig};
    ///
    /// let tls = ClientTlsConfig::new()
    ///     .ca_certificate(Certificate::from_pem(ca_cert))
    ///     .domain_name("xds.example.com");
    ///
    /// let channel = Channel::from_static("https://xds.example.com:443")
    ///     .tls_config(tls)?
    ///     .connect()
    ///     .await?;
    ///
    /// let transport = TonicTransport::from_channel(channel);
    /// ```
    pub fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }

    /// Connect to a management server with default channel settings.
    pub async fn connect(server: &ServerConfig) -> Result<Self> {
        let channel = Channel::from_shared(server.uri().to_string())
            .map_err(|e| Error::Connection(e.to_string()))?
            .connect()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(Self { channel })
    }
}

impl Transport for TonicTransport {
    type Stream = TonicAdsStream;

    async fn new_stream(&self, initial: Vec<DiscoveryRequest>) -> Result<Self::Stream> {
        let mut grpc = Grpc::new(self.channel.clone());

        grpc.ready()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let mut state = StreamState::default();
        let initial_bytes: Vec<Bytes> = initial.into_iter().map(|r| state.encode(r)).collect();

        let (tx, rx) = mpsc::channel::<Bytes>(ADS_CHANNEL_BUFFER_SIZE);

        // The initial requests are part of the request stream from the first
        // poll, so servers that hold response headers until they see a
        // request cannot deadlock stream establishment.
        let request_stream =
            tokio_stream::iter(initial_bytes).chain(tokio_stream::wrappers::ReceiverStream::new(rx));

        let path = PathAndQuery::from_static(ADS_PATH);

        let response = grpc
            .streaming(tonic::Request::new(request_stream), path, BytesCodec)
            .await
            .map_err(|status| Error::Connection(status.to_string()))?;

        Ok(TonicAdsStream {
            sender: tx,
            receiver: response.into_inner(),
            state,
        })
    }
}

/// Per-stream wire-protocol state: the last acknowledged version/nonce and
/// the most recently requested names for each type, plus the node identity
/// to repeat on acknowledgements.
#[derive(Debug, Default)]
struct StreamState {
    acks: HashMap<String, AckState>,
    names: HashMap<String, Vec<String>>,
    node: Option<corepb::Node>,
}

#[derive(Debug, Default, Clone)]
struct AckState {
    version: String,
    nonce: String,
}

impl StreamState {
    /// Encode a coordinator request, filling in the version/nonce recorded
    /// for its type and remembering its names for future acknowledgements.
    fn encode(&mut self, request: DiscoveryRequest) -> Bytes {
        let ack = self
            .acks
            .get(&request.type_url)
            .cloned()
            .unwrap_or_default();
        let node = node_to_proto(&request.node);
        self.node = Some(node.clone());
        self.names
            .insert(request.type_url.clone(), request.resource_names.clone());

        let wire = xdspb::DiscoveryRequest {
            node: Some(node),
            type_url: request.type_url,
            resource_names: request.resource_names,
            version_info: ack.version,
            response_nonce: ack.nonce,
            ..Default::default()
        };
        wire.encode_to_vec().into()
    }

    /// Build the acknowledgement for a response just received.
    fn acknowledge(&mut self, response: &xdspb::DiscoveryResponse) -> Bytes {
        self.acks.insert(
            response.type_url.clone(),
            AckState {
                version: response.version_info.clone(),
                nonce: response.nonce.clone(),
            },
        );

        let wire = xdspb::DiscoveryRequest {
            node: self.node.clone(),
            type_url: response.type_url.clone(),
            resource_names: self
                .names
                .get(&response.type_url)
                .cloned()
                .unwrap_or_default(),
            version_info: response.version_info.clone(),
            response_nonce: response.nonce.clone(),
            ..Default::default()
        };
        wire.encode_to_vec().into()
    }
}

fn node_to_proto(node: &Node) -> corepb::Node {
    corepb::Node {
        id: node.id.clone().unwrap_or_default(),
        cluster: node.cluster.clone().unwrap_or_default(),
        locality: node.locality.as_ref().map(|l| corepb::Locality {
            region: l.region.clone(),
            zone: l.zone.clone(),
            sub_zone: l.sub_zone.clone(),
        }),
        user_agent_name: node.user_agent_name.clone(),
        user_agent_version_type: Some(corepb::node::UserAgentVersionType::UserAgentVersion(
            node.user_agent_version.clone(),
        )),
        ..Default::default()
    }
}

fn response_from_proto(wire: xdspb::DiscoveryResponse) -> DiscoveryResponse {
    DiscoveryResponse {
        type_url: wire.type_url,
        resources: wire
            .resources
            .into_iter()
            .map(|any| ResourceAny {
                type_url: any.type_url,
                value: Bytes::from(any.value),
            })
            .collect(),
        version_info: wire.version_info,
        nonce: wire.nonce,
    }
}

/// A bidirectional ADS stream backed by tonic.
#[derive(Debug)]
pub struct TonicAdsStream {
    sender: mpsc::Sender<Bytes>,
    receiver: Streaming<Bytes>,
    state: StreamState,
}

impl TransportStream for TonicAdsStream {
    async fn send(&mut self, request: DiscoveryRequest) -> Result<()> {
        let bytes = self.state.encode(request);
        self.sender
            .send(bytes)
            .await
            .map_err(|_| Error::StreamClosed)?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>> {
        let bytes = match self.receiver.message().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(status) => return Err(Error::Connection(status.to_string())),
        };

        // A response that cannot even be deserialized as a DiscoveryResponse
        // is a broken stream, not a bad resource.
        let wire = xdspb::DiscoveryResponse::decode(bytes)
            .map_err(|e| Error::Connection(format!("malformed DiscoveryResponse: {e}")))?;

        let ack = self.state.acknowledge(&wire);
        // A failed acknowledgement surfaces as an error on the next receive.
        let _ = self.sender.send(ack).await;

        Ok(Some(response_from_proto(wire)))
    }
}

//! Test doubles shared by the authority tests: a channel-backed mock
//! transport with a test-side control handle, a recording watcher, and a
//! toy resource type whose payloads are their own names.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};

use crate::authority::watch::ResourceWatcher;
use crate::error::{Error, Result};
use crate::message::{DiscoveryRequest, DiscoveryResponse, ResourceAny};
use crate::resource::{
    DecodeResult, DecodedResource, Decoder, ResourceData, ResourceType, TypeRegistry,
};
use crate::transport::{Transport, TransportStream};

pub(crate) const TEST_TYPE_URL: &str = "type.googleapis.com/test.v3.Widget";

/// Everything a watcher saw, in order.
#[derive(Debug)]
pub(crate) enum WatchEvent {
    Update(DecodedResource),
    Error(Error),
    DoesNotExist,
}

pub(crate) struct RecordingWatcher {
    events: mpsc::UnboundedSender<WatchEvent>,
}

impl RecordingWatcher {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events: tx }), rx)
    }
}

impl ResourceWatcher for RecordingWatcher {
    fn on_update(&self, resource: DecodedResource) {
        let _ = self.events.send(WatchEvent::Update(resource));
    }

    fn on_error(&self, error: Error) {
        let _ = self.events.send(WatchEvent::Error(error));
    }

    fn on_resource_does_not_exist(&self) {
        let _ = self.events.send(WatchEvent::DoesNotExist);
    }
}

pub(crate) struct TestPayload(pub(crate) String);

impl ResourceData for TestPayload {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decoder for the toy type: the payload bytes are the resource name.
/// `invalid:<name>` fails per-resource, `garbage` fails at the top level.
struct TestDecoder;

impl Decoder for TestDecoder {
    fn decode(&self, resource: ResourceAny) -> DecodeResult {
        let Ok(text) = std::str::from_utf8(&resource.value) else {
            return DecodeResult::TopLevelError(Error::Decode {
                type_url: resource.type_url,
                message: "not utf-8".into(),
            });
        };
        if text == "garbage" {
            return DecodeResult::TopLevelError(Error::Decode {
                type_url: resource.type_url,
                message: "undecodable payload".into(),
            });
        }
        if let Some(name) = text.strip_prefix("invalid:") {
            return DecodeResult::ResourceError {
                name: name.to_string(),
                error: Error::Decode {
                    type_url: resource.type_url,
                    message: "validation failed".into(),
                },
            };
        }
        DecodeResult::Resource(decoded(text))
    }
}

pub(crate) fn decoded(name: &str) -> DecodedResource {
    DecodedResource::new(name, Arc::new(TestPayload(name.to_string())))
}

pub(crate) fn test_resource_type(full_state_on_wire: bool) -> ResourceType {
    ResourceType::new(TEST_TYPE_URL, full_state_on_wire, TestDecoder)
}

pub(crate) fn test_type_registry(rtype: &ResourceType) -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register(rtype.clone());
    Arc::new(registry)
}

pub(crate) fn resource_any(payload: &str) -> ResourceAny {
    ResourceAny {
        type_url: TEST_TYPE_URL.to_string(),
        value: Bytes::from(payload.to_string()),
    }
}

pub(crate) fn response(payloads: &[&str]) -> DiscoveryResponse {
    DiscoveryResponse {
        type_url: TEST_TYPE_URL.to_string(),
        resources: payloads.iter().map(|p| resource_any(p)).collect(),
        version_info: "1".to_string(),
        nonce: "n".to_string(),
    }
}

/// Let every ready task (worker, serializer, timers) run to completion of
/// its current step without advancing time.
pub(crate) async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

type StreamResult = Result<Option<DiscoveryResponse>>;

/// Transport whose streams are scripted by the test through [`MockControl`].
/// `new_stream` blocks until the control handle offers a stream, so a test
/// models a down server by simply not offering one.
pub(crate) struct MockTransport {
    incoming: Mutex<mpsc::UnboundedReceiver<MockStream>>,
}

pub(crate) struct MockStream {
    sent: mpsc::UnboundedSender<DiscoveryRequest>,
    responses: mpsc::UnboundedReceiver<StreamResult>,
}

/// Test-side handle that scripts the transport.
pub(crate) struct MockControl {
    streams: mpsc::UnboundedSender<MockStream>,
}

impl MockControl {
    /// Offer one stream to the transport. Returns the receiving side of the
    /// worker's requests and the sending side of the server's responses.
    /// Dropping the response sender ends the stream cleanly; sending an
    /// `Err` breaks it.
    pub(crate) fn offer_stream(
        &self,
    ) -> (
        mpsc::UnboundedReceiver<DiscoveryRequest>,
        mpsc::UnboundedSender<StreamResult>,
    ) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        self.streams
            .send(MockStream {
                sent: sent_tx,
                responses: resp_rx,
            })
            .expect("transport dropped");
        (sent_rx, resp_tx)
    }
}

pub(crate) fn mock_transport() -> (MockTransport, MockControl) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockTransport {
            incoming: Mutex::new(rx),
        },
        MockControl { streams: tx },
    )
}

impl Transport for MockTransport {
    type Stream = MockStream;

    async fn new_stream(&self, initial: Vec<DiscoveryRequest>) -> Result<Self::Stream> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(stream) => {
                // Establishment is the send confirmation for the initial
                // batch; surface it to the test like any other request.
                for request in initial {
                    let _ = stream.sent.send(request);
                }
                Ok(stream)
            }
            None => Err(Error::Connection("mock transport shut down".into())),
        }
    }
}

impl TransportStream for MockStream {
    async fn send(&mut self, request: DiscoveryRequest) -> Result<()> {
        self.sent
            .send(request)
            .map_err(|_| Error::Connection("mock stream torn down".into()))
    }

    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>> {
        match self.responses.recv().await {
            Some(result) => result,
            None => Ok(None),
        }
    }
}

//! Transport abstraction for the ADS stream.
//!
//! The stream coordinator drives these traits and interprets their results
//! as the protocol signals it reacts to: a successful [`TransportStream::send`]
//! (or successful stream establishment, for the initial batch) is the
//! on-send confirmation; `recv` yields on-receive, end-of-stream, and
//! stream-error signals. Dropping a stream closes it.

use std::future::Future;

use crate::error::Result;
use crate::message::{DiscoveryRequest, DiscoveryResponse};

#[cfg(feature = "transport-tonic")]
pub mod tonic;

/// Factory for ADS streams to one management server.
///
/// Implementations own the wire format and channel credentials. The
/// coordinator calls [`new_stream`](Transport::new_stream) again after every
/// stream failure.
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport.
    type Stream: TransportStream;

    /// Open a bidirectional ADS stream.
    ///
    /// `initial` carries one request per subscribed type, sent as part of
    /// establishment so that servers which hold response headers until they
    /// see a request cannot deadlock the stream. A successful return confirms
    /// those requests were handed to the wire.
    fn new_stream(
        &self,
        initial: Vec<DiscoveryRequest>,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// One bidirectional ADS stream.
pub trait TransportStream: Send + 'static {
    /// Send a discovery request. `Ok` confirms the request was handed to
    /// the wire.
    fn send(&mut self, request: DiscoveryRequest) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next discovery response.
    ///
    /// Returns:
    /// - `Ok(Some(response))` - a response arrived.
    /// - `Ok(None)` - the server ended the stream.
    /// - `Err(_)` - the stream broke.
    fn recv(&mut self) -> impl Future<Output = Result<Option<DiscoveryResponse>>> + Send;
}

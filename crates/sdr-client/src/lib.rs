//! Typed client for the SDR daemon's channel-control protocol.
//!
//! The protocol itself is an external interface: requests are short JSON
//! documents sent over whatever transport the caller wires up (a TCP
//! control socket in production, an in-memory channel in tests). This
//! crate only owns the request/response shapes and the one retry-free
//! round trip each makes; it does not own a transport.

pub mod destination;
pub mod request;

pub use destination::derive_multicast_destination;
pub use request::{
    ChannelDescriptor, CreateChannelRequest, CreateChannelResponse, DiscoverChannelsRequest,
    Error, RemoveChannelRequest, RequestBuilder, RequestStream, SetOutputEncodingRequest,
    TuneRequest,
};

/// IQ encoding requested of (or reported by) an SDR channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    Int16,
    Float32,
}

/// Thin wrapper around a [`RequestStream`] that drives the five control
/// operations. Constructed once per SDR connection and reused across
/// calls rather than reconnecting per request.
pub struct SdrClient<T> {
    stream: T,
}

impl<T: RequestStream> SdrClient<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    pub async fn create_channel(
        &mut self,
        req: CreateChannelRequest,
    ) -> Result<CreateChannelResponse, Error> {
        req.request(&mut self.stream).await
    }

    pub async fn tune(&mut self, req: TuneRequest) -> Result<(), Error> {
        req.request(&mut self.stream).await
    }

    pub async fn set_output_encoding(
        &mut self,
        req: SetOutputEncodingRequest,
    ) -> Result<(), Error> {
        req.request(&mut self.stream).await
    }

    pub async fn remove_channel(&mut self, req: RemoveChannelRequest) -> Result<(), Error> {
        req.request(&mut self.stream).await
    }

    pub async fn discover_channels(&mut self) -> Result<Vec<ChannelDescriptor>, Error> {
        DiscoverChannelsRequest.request(&mut self.stream).await
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::OutputEncoding;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// The SDR rejected the request; carries its error string verbatim.
    Rejected(String),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One JSON-lines request/response round trip to the SDR daemon. A mock
/// implementation backed by an in-memory queue is used in tests to drive
/// the orchestrator without a real daemon.
pub trait RequestStream {
    fn send(&mut self, line: String) -> impl Future<Output = Result<(), std::io::Error>>;
    fn read(&mut self) -> impl Future<Output = Result<String, std::io::Error>>;
}

/// Implemented once per request type; mirrors the wire envelope
/// `{"op": "...", ...fields} -> {"ok": bool, ...fields | error}`.
pub trait RequestBuilder {
    type Response;

    fn request<T>(&self, stream: &mut T) -> impl Future<Output = Result<Self::Response, Error>>
    where
        T: RequestStream;
}

/// A channel entry as reported by `discover_channels`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub ssrc: u32,
    pub frequency_hz: u64,
    pub preset: String,
    pub sample_rate_hz: u32,
    pub destination: String,
    /// `(gps_time_seconds, rtp_timestamp)` anchor the daemon last reported
    /// for this channel, if any.
    pub anchor: Option<(f64, u32)>,
}

fn envelope<Req: Serialize>(op: &'static str, req: &Req) -> Result<String, Error> {
    let mut value = serde_json::to_value(req)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert("op".into(), serde_json::Value::String(op.into()));
    }
    Ok(serde_json::to_string(&value)?)
}

async fn round_trip<T, Req, Resp>(op: &'static str, req: &Req, stream: &mut T) -> Result<Resp, Error>
where
    T: RequestStream,
    Req: Serialize,
    Resp: serde::de::DeserializeOwned,
{
    stream.send(envelope(op, req)?).await?;
    let line = stream.read().await?;
    let mut value: serde_json::Value = serde_json::from_str(&line)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| Error::Rejected("malformed response envelope".into()))?;
    let ok = object
        .remove("ok")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !ok {
        let message = object
            .remove("error")
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        return Err(Error::Rejected(message));
    }
    object.remove("error");
    Ok(serde_json::from_value(value)?)
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateChannelRequest {
    pub frequency_hz: u64,
    pub preset: String,
    pub sample_rate_hz: u32,
    pub destination: String,
    pub agc: bool,
    pub gain_db: f32,
    pub encoding: OutputEncoding,
    pub ssrc: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChannelResponse {
    pub ssrc: u32,
}

impl RequestBuilder for CreateChannelRequest {
    type Response = CreateChannelResponse;

    async fn request<T>(&self, stream: &mut T) -> Result<Self::Response, Error>
    where
        T: RequestStream,
    {
        round_trip("create_channel", self, stream).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TuneRequest {
    pub ssrc: u32,
    pub preset: String,
    pub sample_rate_hz: u32,
}

impl RequestBuilder for TuneRequest {
    type Response = ();

    async fn request<T>(&self, stream: &mut T) -> Result<(), Error>
    where
        T: RequestStream,
    {
        round_trip::<_, _, AckBody>("tune", self, stream).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetOutputEncodingRequest {
    pub ssrc: u32,
    pub encoding: OutputEncoding,
}

impl RequestBuilder for SetOutputEncodingRequest {
    type Response = ();

    async fn request<T>(&self, stream: &mut T) -> Result<(), Error>
    where
        T: RequestStream,
    {
        round_trip::<_, _, AckBody>("set_output_encoding", self, stream).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveChannelRequest {
    pub ssrc: u32,
}

impl RequestBuilder for RemoveChannelRequest {
    type Response = ();

    async fn request<T>(&self, stream: &mut T) -> Result<(), Error>
    where
        T: RequestStream,
    {
        round_trip::<_, _, AckBody>("remove_channel", self, stream).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiscoverChannelsRequest;

#[derive(Debug, Deserialize)]
struct DiscoverChannelsResponse {
    channels: Vec<ChannelDescriptor>,
}

impl RequestBuilder for DiscoverChannelsRequest {
    type Response = Vec<ChannelDescriptor>;

    async fn request<T>(&self, stream: &mut T) -> Result<Self::Response, Error>
    where
        T: RequestStream,
    {
        let resp: DiscoverChannelsResponse = round_trip("discover_channels", self, stream).await?;
        Ok(resp.channels)
    }
}

#[derive(Debug, Deserialize)]
struct AckBody {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockStream {
        sent: Vec<String>,
        responses: VecDeque<String>,
    }

    impl RequestStream for MockStream {
        async fn send(&mut self, line: String) -> Result<(), std::io::Error> {
            self.sent.push(line);
            Ok(())
        }

        async fn read(&mut self) -> Result<String, std::io::Error> {
            Ok(self.responses.pop_front().unwrap_or_else(|| "{}".into()))
        }
    }

    #[tokio::test]
    async fn create_channel_round_trips() {
        let mut stream = MockStream {
            sent: Vec::new(),
            responses: VecDeque::from([r#"{"ok":true,"ssrc":42}"#.to_string()]),
        };
        let req = CreateChannelRequest {
            frequency_hz: 10_000_000,
            preset: "wwv".into(),
            sample_rate_hz: 20_000,
            destination: "239.1.2.3:5004".into(),
            agc: true,
            gain_db: 0.0,
            encoding: OutputEncoding::Float32,
            ssrc: None,
        };
        let resp = req.request(&mut stream).await.unwrap();
        assert_eq!(resp.ssrc, 42);
        assert!(stream.sent[0].contains("\"op\":\"create_channel\""));
    }

    #[tokio::test]
    async fn rejection_surfaces_as_error() {
        let mut stream = MockStream {
            sent: Vec::new(),
            responses: VecDeque::from([r#"{"ok":false,"error":"destination in use"}"#.to_string()]),
        };
        let req = RemoveChannelRequest { ssrc: 7 };
        let err = req.request(&mut stream).await.unwrap_err();
        assert!(matches!(err, Error::Rejected(msg) if msg == "destination in use"));
    }

    #[tokio::test]
    async fn discover_channels_parses_table() {
        let mut stream = MockStream {
            sent: Vec::new(),
            responses: VecDeque::from([
                r#"{"ok":true,"channels":[{"ssrc":1,"frequency_hz":10000000,"preset":"wwv","sample_rate_hz":20000,"destination":"239.1.1.1:5004","anchor":null}]}"#
                    .to_string(),
            ]),
        };
        let channels = DiscoverChannelsRequest.request(&mut stream).await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].ssrc, 1);
    }
}

//! Push transport abstraction and its WebSocket implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::error::ChannelError;

/// A data frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Server-initiated close, with the close reason if one was sent.
    Close(Option<String>),
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ChannelError>> + Send>>;

/// An established connection, split into its outbound and inbound halves.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transport connections.
///
/// The URL passed in already carries the bearer token as its `token` query
/// parameter; `token` is handed over as well so transports that support
/// request headers can send it as `Authorization: Bearer`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url, token: &SecretString) -> Result<Transport, ChannelError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url, token: &SecretString) -> Result<Transport, ChannelError> {
        let request = handshake_request(url, token)?;
        let (ws, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(handshake_error)?;
        tracing::debug!("WebSocket handshake completed (HTTP {})", response.status());

        let (write, read) = ws.split();
        let sink = write
            .with(|text: String| {
                futures::future::ready(Ok::<_, tungstenite::Error>(Message::Text(text.into())))
            })
            .sink_map_err(|e| ChannelError::TransportError(e.to_string()));
        let stream = read.filter_map(|msg| futures::future::ready(frame_from_message(msg)));

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Upgrade request for `url` with the bearer token in the `Authorization` header.
fn handshake_request(url: &Url, token: &SecretString) -> Result<Request, ChannelError> {
    let mut request = url.as_str().into_client_request().map_err(handshake_error)?;
    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
        .map_err(|_| {
            ChannelError::TransportError("token is not a valid header value".to_string())
        })?;
    bearer.set_sensitive(true);
    request.headers_mut().insert(header::AUTHORIZATION, bearer);
    Ok(request)
}

fn frame_from_message(
    msg: Result<Message, tungstenite::Error>,
) -> Option<Result<Frame, ChannelError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_string()))),
        Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
        Ok(Message::Close(frame)) => Some(Ok(Frame::Close(
            frame
                .map(|f| f.reason.as_str().to_string())
                .filter(|reason| !reason.is_empty()),
        ))),
        // Control frames are answered by tungstenite itself.
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
            Some(Ok(Frame::Close(None)))
        }
        Err(e) => Some(Err(ChannelError::TransportError(e.to_string()))),
    }
}

fn handshake_error(error: tungstenite::Error) -> ChannelError {
    match error {
        tungstenite::Error::Http(response) => ChannelError::TransportError(format!(
            "handshake rejected with HTTP {}",
            response.status()
        )),
        tungstenite::Error::Url(e) => ChannelError::InvalidUrl(e.to_string()),
        other => ChannelError::TransportError(other.to_string()),
    }
}

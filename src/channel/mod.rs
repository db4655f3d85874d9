//! Authenticated live channel.
//!
//! Holds at most one push connection. Every state change goes through
//! [`ChannelState::next`]; the result is published on a `watch` channel and
//! lifecycle events on a `broadcast` channel. Inbound frames are decoded and
//! fanned out to [`MessageStream`] subscribers in arrival order.

mod message;
mod transport;

pub use self::message::ChannelMessage;
pub use self::transport::{Connector, Frame, FrameSink, FrameStream, Transport, WsConnector};

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use secrecy::ExposeSecret;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use crate::config::DEFAULT_CONNECT_TIMEOUT_MS;
use crate::error::ChannelError;
use crate::redact::redact_url;
use crate::store::CredentialStore;

const EVENT_CAPACITY: usize = 64;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    /// Transport reported an error; the close notification is still pending.
    Closed,
}

/// Lifecycle notifications for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: Option<String> },
    Error(ChannelError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transition {
    Connect,
    Opened,
    Failed(ChannelError),
    Closed(Option<String>),
    Disconnect,
}

impl ChannelState {
    /// The state after `transition`, or `None` if it does not apply here.
    fn next(self, transition: &Transition) -> Option<Self> {
        match (self, transition) {
            (Self::Disconnected, Transition::Connect) => Some(Self::Connecting),
            (Self::Connecting, Transition::Opened) => Some(Self::Open),
            (Self::Connecting | Self::Open, Transition::Failed(_)) => Some(Self::Closed),
            (
                Self::Connecting | Self::Open | Self::Closed,
                Transition::Closed(_) | Transition::Disconnect,
            ) => Some(Self::Disconnected),
            _ => None,
        }
    }
}

struct Inner {
    state: ChannelState,
    /// Bumped whenever a connection ends; tasks holding an older value are stale.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    subscribers: Vec<mpsc::UnboundedSender<ChannelMessage>>,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ChannelState>,
    events: broadcast::Sender<ChannelEvent>,
    malformed_frames: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(&self, inner: &mut Inner, transition: Transition) -> bool {
        let Some(next) = inner.state.next(&transition) else {
            tracing::trace!("Ignoring {:?} in state {:?}", transition, inner.state);
            return false;
        };
        tracing::debug!("Live channel {:?} -> {:?}", inner.state, next);
        inner.state = next;
        self.state_tx.send_replace(next);

        let event = match transition {
            Transition::Connect => None,
            Transition::Opened => Some(ChannelEvent::Connected),
            Transition::Failed(error) => Some(ChannelEvent::Error(error)),
            Transition::Closed(reason) => Some(ChannelEvent::Disconnected { reason }),
            Transition::Disconnect => Some(ChannelEvent::Disconnected { reason: None }),
        };
        if let Some(event) = event {
            // No receivers is fine.
            let _ = self.events.send(event);
        }

        if next == ChannelState::Disconnected {
            inner.generation += 1;
            inner.outbound = None;
            inner.subscribers.clear();
        }
        true
    }

    /// End the connection identified by `generation`, if it is still current.
    fn finish(&self, generation: u64, end: Transition) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        match end {
            Transition::Failed(error) => {
                tracing::warn!("Live channel failed: {}", error);
                let reason = error.to_string();
                self.apply(&mut inner, Transition::Failed(error));
                self.apply(&mut inner, Transition::Closed(Some(reason)));
            }
            other => {
                self.apply(&mut inner, other);
            }
        }
    }

    fn deliver(&self, generation: u64, raw: &str) {
        let message = match ChannelMessage::parse(raw) {
            Ok(message) => message,
            Err(error) => {
                self.drop_malformed(&error);
                return;
            }
        };
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ChannelState::Open {
            return;
        }
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(message.clone()).is_ok());
    }

    fn drop_malformed(&self, error: &ChannelError) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Dropping inbound frame: {}", error);
    }
}

/// Ends a pending attempt if `connect` is dropped before the transport is up.
struct PendingConnect {
    shared: Arc<Shared>,
    generation: u64,
    armed: bool,
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Live channel connect abandoned");
            self.shared.finish(self.generation, Transition::Disconnect);
        }
    }
}

/// Ordered stream of decoded inbound messages.
///
/// Ends when the connection it is attached to closes.
pub struct MessageStream {
    inner: UnboundedReceiverStream<ChannelMessage>,
}

impl MessageStream {
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.inner.next().await
    }
}

impl Stream for MessageStream {
    type Item = ChannelMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Authenticated push connection to the backend.
pub struct LiveChannel {
    url: Url,
    connect_timeout: Duration,
    store: Arc<CredentialStore>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl LiveChannel {
    /// `url` is the channel endpoint without credentials; the token is
    /// read from `store` on every connect.
    pub fn new(url: Url, store: Arc<CredentialStore>, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            url,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            store,
            connector,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ChannelState::Disconnected,
                    generation: 0,
                    outbound: None,
                    subscribers: Vec::new(),
                }),
                state_tx,
                events,
                malformed_frames: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    /// Number of inbound frames dropped because they could not be decoded.
    pub fn malformed_frames(&self) -> u64 {
        self.shared.malformed_frames.load(Ordering::Relaxed)
    }

    /// Open a connection authenticated with the current session token.
    ///
    /// Any existing connection is torn down first. Fails with
    /// `NoActiveSession` (leaving the state untouched) if there is no
    /// session, and with `Superseded` if `disconnect` or another `connect`
    /// ran while this one was waiting on the transport.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let token = match self.store.token().await {
            Some(token) if !token.expose_secret().trim().is_empty() => token,
            _ => {
                tracing::warn!("Live channel connect refused: no active session");
                return Err(ChannelError::NoActiveSession);
            }
        };
        let url = authenticated_url(&self.url, token.expose_secret());

        let generation = {
            let mut inner = self.shared.lock();
            if inner.state != ChannelState::Disconnected {
                tracing::debug!("Tearing down existing live connection");
                self.shared.apply(&mut inner, Transition::Disconnect);
            }
            self.shared.apply(&mut inner, Transition::Connect);
            inner.generation
        };
        let mut pending = PendingConnect {
            shared: Arc::clone(&self.shared),
            generation,
            armed: true,
        };

        tracing::info!("Connecting live channel to {}", redact_url(&url));
        let attempt = tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(&url, &token),
        )
        .await;
        let transport = match attempt {
            Ok(Ok(transport)) => transport,
            Ok(Err(error)) => {
                self.shared
                    .finish(generation, Transition::Failed(error.clone()));
                return Err(error);
            }
            Err(_) => {
                let error = ChannelError::ConnectTimeout {
                    timeout_ms: self.connect_timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                };
                self.shared
                    .finish(generation, Transition::Failed(error.clone()));
                return Err(error);
            }
        };

        let outbound_rx = {
            let mut inner = self.shared.lock();
            if inner.generation != generation || inner.state != ChannelState::Connecting {
                tracing::debug!("Discarding superseded live connection");
                return Err(ChannelError::Superseded);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            inner.outbound = Some(tx);
            self.shared.apply(&mut inner, Transition::Opened);
            rx
        };
        pending.armed = false;
        tracing::info!("Live channel open");

        tokio::spawn(pump(
            Arc::clone(&self.shared),
            generation,
            transport,
            outbound_rx,
        ));
        Ok(())
    }

    /// Close the connection. Calling it while already disconnected does nothing.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        if self.shared.apply(&mut inner, Transition::Disconnect) {
            tracing::info!("Live channel disconnected");
        }
    }

    /// Queue `message` for sending. Returns `false` (and sends nothing)
    /// unless the channel is open.
    pub fn send(&self, message: &ChannelMessage) -> bool {
        let inner = self.shared.lock();
        if inner.state != ChannelState::Open {
            tracing::debug!(
                "Dropping outbound '{}' message: channel is {:?}",
                message.kind,
                inner.state
            );
            return false;
        }
        let Some(outbound) = inner.outbound.as_ref() else {
            return false;
        };
        match message.to_frame() {
            Ok(frame) => outbound.send(frame).is_ok(),
            Err(error) => {
                tracing::warn!("Cannot encode outbound message: {}", error);
                false
            }
        }
    }

    /// Subscribe to inbound messages.
    ///
    /// A subscription taken while disconnected attaches to the next
    /// connection.
    pub fn subscribe(&self) -> MessageStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.shared.lock();
        inner.subscribers.retain(|subscriber| !subscriber.is_closed());
        inner.subscribers.push(tx);
        MessageStream {
            inner: UnboundedReceiverStream::new(rx),
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveChannel")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

/// `base` with the bearer token set as its `token` query parameter.
fn authenticated_url(base: &Url, token: &str) -> Url {
    let retained: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != "token")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut url = base.clone();
    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("token", token);
    }
    url
}

async fn pump(
    shared: Arc<Shared>,
    generation: u64,
    transport: Transport,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let Transport {
        mut sink,
        mut stream,
    } = transport;

    let end = loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(frame) => {
                    if let Err(error) = sink.send(frame).await {
                        break Transition::Failed(error);
                    }
                }
                // Sender dropped: the channel was disconnected locally.
                None => {
                    let _ = sink.close().await;
                    break Transition::Disconnect;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Frame::Text(text))) => shared.deliver(generation, &text),
                Some(Ok(Frame::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => shared.deliver(generation, &text),
                    Err(_) => shared.drop_malformed(&ChannelError::MalformedFrame(
                        "binary frame is not UTF-8".to_string(),
                    )),
                },
                Some(Ok(Frame::Close(reason))) => break Transition::Closed(reason),
                Some(Err(error)) => break Transition::Failed(error),
                None => break Transition::Closed(None),
            },
        }
    };

    shared.finish(generation, end);
}

//! Orchestrator connection management.

use crate::error::{ClientError, Result};
use crate::pending::{InFlight, PendingRequests};
use crate::router::InboundRouter;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use swarmforge_core::{
    ConnectionState, CustomModes, DEFAULT_HOST, DEFAULT_PORT, Envelope, ErrorData, Payload,
    TaskUpdate, codec,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// How long a graceful close waits for the peer's acknowledgement.
    pub close_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Close handshake, initiated by either side.
    Normal,
    /// Transport failure while receiving.
    Fault,
    /// Forced local teardown without a handshake.
    EndpointUnavailable,
}

/// Lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    Error(String),
    Closed(CloseReason),
}

/// A single persistent connection to the orchestrator.
///
/// Cheap to clone; clones share the socket.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<SessionConfig>,
    state: RwLock<ConnectionState>,
    writer: Mutex<Option<WsWriter>>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every connect and teardown so a stale listen loop stops
    /// touching the session.
    epoch: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    router: InboundRouter,
    pending: Arc<PendingRequests>,
    in_flight: Arc<InFlight>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                state: RwLock::new(ConnectionState::Disconnected),
                writer: Mutex::new(None),
                listen_task: Mutex::new(None),
                epoch: AtomicU64::new(0),
                events,
                router: InboundRouter::new(),
                pending: Arc::new(PendingRequests::default()),
                in_flight: Arc::new(InFlight::default()),
            }),
        }
    }

    /// Inbound handler registry. Configure it before [`Session::connect`].
    pub fn router(&self) -> &InboundRouter {
        &self.inner.router
    }

    /// Subscribe to lifecycle events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Open
    }

    pub async fn endpoint(&self) -> String {
        self.inner.config.read().await.url()
    }

    /// Point the session at another port, e.g. when the orchestrator bound a fallback.
    pub async fn set_port(&self, port: u16) -> Result<()> {
        let state = self.inner.state.read().await;
        if *state == ConnectionState::Open {
            warn!(port, "cannot change port while connected, disconnect first");
            return Err(ClientError::State(
                "cannot change port while connected".to_string(),
            ));
        }
        let mut config = self.inner.config.write().await;
        config.port = port;
        info!(url = %config.url(), "orchestrator endpoint updated");
        Ok(())
    }

    /// Connect and start the listen loop. No-op when already open.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            match *state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Closing => {
                    return Err(ClientError::State(format!("cannot connect while {}", *state)));
                }
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        let (url, connect_timeout) = {
            let config = self.inner.config.read().await;
            (config.url(), config.connect_timeout)
        };
        info!(url = %url, "connecting to orchestrator");

        let stream = match timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(error)) => {
                return Err(self
                    .connect_failed(&url, ClientError::Transport(error.to_string()))
                    .await);
            }
            Err(_) => {
                let error =
                    ClientError::Timeout(format!("connection timeout after {connect_timeout:?}"));
                return Err(self.connect_failed(&url, error).await);
            }
        };

        let (writer, reader) = stream.split();
        {
            // Held until the listen task is stored, so neither a disconnect nor
            // the loop's own teardown can observe `Open` without it.
            let mut state = self.inner.state.write().await;
            *self.inner.writer.lock().await = Some(writer);
            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let task = tokio::spawn(listen(Arc::downgrade(&self.inner), reader, epoch));
            *self.inner.listen_task.lock().await = Some(task);
            *state = ConnectionState::Open;
            self.inner.emit(SessionEvent::Opened);
        }
        info!(url = %url, "connected to orchestrator");
        Ok(())
    }

    async fn connect_failed(&self, url: &str, error: ClientError) -> ClientError {
        warn!(url, %error, "connection to orchestrator failed");
        *self.inner.state.write().await = ConnectionState::Disconnected;
        self.inner
            .emit(SessionEvent::Error(format!("failed to connect to {url}: {error}")));
        error
    }

    /// Close the connection.
    ///
    /// A graceful close sends a close frame and waits up to the configured
    /// timeout for the peer to answer before forcing the socket shut.
    pub async fn disconnect(&self, graceful: bool) -> Result<()> {
        let epoch = {
            let mut state = self.inner.state.write().await;
            match *state {
                ConnectionState::Disconnected => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Closing => {
                    return Err(ClientError::State(format!(
                        "cannot disconnect while {}",
                        *state
                    )));
                }
                ConnectionState::Open => {
                    if graceful {
                        *state = ConnectionState::Closing;
                    }
                }
            }
            self.inner.epoch.load(Ordering::SeqCst)
        };
        info!(graceful, "disconnecting from orchestrator");

        let task = self.inner.listen_task.lock().await.take();
        if !graceful {
            if let Some(task) = task {
                task.abort();
            }
            self.inner
                .teardown(epoch, CloseReason::EndpointUnavailable)
                .await;
            return Ok(());
        }

        let close_timeout = self.inner.config.read().await.close_timeout;
        {
            let mut writer = self.inner.writer.lock().await;
            if let Some(writer) = writer.as_mut() {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                if let Err(error) = writer.send(Message::Close(Some(frame))).await {
                    warn!(%error, "failed to send close frame");
                }
            }
        }

        if let Some(mut task) = task
            && timeout(close_timeout, &mut task).await.is_err()
        {
            warn!(?close_timeout, "close not acknowledged in time, forcing close");
            task.abort();
        }
        self.inner.teardown(epoch, CloseReason::Normal).await;
        Ok(())
    }

    /// Serialize and write one envelope.
    ///
    /// A write failure is reported as an [`SessionEvent::Error`] but leaves the
    /// state alone; the listen loop decides whether the transport is dead.
    pub async fn send<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<()> {
        if self.state().await != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let text = codec::encode(envelope)?;

        let mut writer_guard = self.inner.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        if let Err(error) = writer.send(Message::Text(text.into())).await {
            let message = format!("failed to send `{}`: {error}", envelope.kind());
            warn!(message_type = envelope.kind(), %error, "send failed");
            self.inner.emit(SessionEvent::Error(message.clone()));
            return Err(ClientError::Transport(message));
        }
        debug!(
            message_type = envelope.kind(),
            request_id = envelope.request_id().unwrap_or(""),
            "sent message"
        );
        Ok(())
    }

    pub(crate) fn pending(&self) -> &Arc<PendingRequests> {
        &self.inner.pending
    }

    pub(crate) fn in_flight(&self) -> &Arc<InFlight> {
        &self.inner.in_flight
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn handle_text(&self, text: &str) {
        match codec::decode_header(text) {
            Ok(header) => {
                if let Some(request_id) = header.request_id.as_deref() {
                    self.pending.deliver(request_id, &header.kind, text);
                    if settles_request(&header.kind, text) && self.in_flight.retire(request_id) {
                        debug!(request_id, message_type = %header.kind, "request settled");
                    }
                }
                self.router.route(&header, text).await;
            }
            Err(_) => {
                self.router.dispatch(text).await;
            }
        }
    }

    /// Release the socket and report `Closed` once per connection.
    async fn teardown(&self, epoch: u64, reason: CloseReason) {
        {
            let mut state = self.state.write().await;
            if self.epoch.load(Ordering::SeqCst) != epoch
                || *state == ConnectionState::Disconnected
            {
                return;
            }
            *state = ConnectionState::Disconnected;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.writer.lock().await.take();
        }
        self.pending.close_all();
        self.in_flight.clear();
        info!(?reason, "orchestrator connection closed");
        self.emit(SessionEvent::Closed(reason));
    }
}

/// Whether a correlated frame ends its request: a mode list, an error, or a
/// terminal task update.
fn settles_request(kind: &str, text: &str) -> bool {
    match kind {
        CustomModes::TYPE | ErrorData::TYPE => true,
        TaskUpdate::TYPE => codec::decode::<TaskUpdate>(text)
            .map(|envelope| envelope.data().outcome().is_terminal())
            .unwrap_or(false),
        _ => false,
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.listen_task.get_mut().take() {
            task.abort();
        }
    }
}

enum ListenExit {
    CloseFrame,
    StreamEnded,
    Fault(String),
}

async fn listen(inner: Weak<Inner>, mut reader: WsReader, epoch: u64) {
    let exit = loop {
        let Some(frame) = reader.next().await else {
            break ListenExit::StreamEnded;
        };
        let Some(session) = inner.upgrade() else {
            return;
        };
        if session.epoch.load(Ordering::SeqCst) != epoch {
            debug!(epoch, "listen loop outlived its connection, stopping");
            return;
        }
        match frame {
            Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
            Ok(Message::Close(frame)) => {
                debug!(?frame, "received close frame");
                break ListenExit::CloseFrame;
            }
            Ok(Message::Ping(payload)) => {
                debug!("received ping ({} bytes)", payload.len());
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                debug!("ignoring binary frame");
            }
            Ok(Message::Frame(_)) => {}
            Err(error) => {
                warn!(%error, "websocket read error");
                break ListenExit::Fault(error.to_string());
            }
        }
    };

    let Some(session) = inner.upgrade() else {
        return;
    };
    let reason = match exit {
        ListenExit::CloseFrame => CloseReason::Normal,
        ListenExit::StreamEnded if *session.state.read().await == ConnectionState::Closing => {
            CloseReason::Normal
        }
        ListenExit::StreamEnded => {
            session.emit(SessionEvent::Error(
                "connection dropped without a close frame".to_string(),
            ));
            CloseReason::Fault
        }
        ListenExit::Fault(message) => {
            session.emit(SessionEvent::Error(message));
            CloseReason::Fault
        }
    };
    session.teardown(epoch, reason).await;
}

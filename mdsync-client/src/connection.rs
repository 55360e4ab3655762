//! Socket lifecycle and connection-status state machine.
//!
//! ```text
//!             open                    close
//! connecting ──────► connected ─────────────────► disconnected ─┐
//!     ▲                  │  error                               │
//!     │                  └────────────────────────► error ──────┤
//!     │                                                         │
//!     └──────────────── reconnect timer (1000 ms) ◄─────────────┘
//!
//! disconnect() from any state: cancel timer, close socket, stop.
//! ```
//!
//! The manager never blocks: opening a socket runs in a spawned task that
//! reports back through a signal channel, and the owner feeds those signals
//! to [`ConnectionManager::handle_signal`] from its event loop. Every socket
//! attempt gets a generation number so late signals from an abandoned socket
//! are ignored.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::HANDSHAKE_TIMEOUT;
use crate::protocol::{Message, MessageType};
use crate::router::{Dispatch, HandlerError, MessageRouter};
use crate::timer::Timer;
use crate::transport::{SocketEvent, Transport};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Observable connection status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// True iff `state` is `Connected`.
    pub is_connected: bool,
    pub status_text: &'static str,
}

impl ConnectionStatus {
    pub fn connecting() -> Self {
        Self::new(ConnectionState::Connecting, "Connecting...")
    }

    pub fn connected() -> Self {
        Self::new(ConnectionState::Connected, "Connected")
    }

    /// Socket closed; a reconnect is pending.
    pub fn disconnected() -> Self {
        Self::new(ConnectionState::Disconnected, "Disconnected - reconnecting...")
    }

    /// Socket failed; a reconnect is pending.
    pub fn error() -> Self {
        Self::new(ConnectionState::Error, "Error - reconnecting...")
    }

    /// Closed on request; no reconnect.
    pub fn stopped() -> Self {
        Self::new(ConnectionState::Disconnected, "Disconnected")
    }

    fn new(state: ConnectionState, status_text: &'static str) -> Self {
        Self {
            state,
            is_connected: state == ConnectionState::Connected,
            status_text,
        }
    }
}

/// A socket lifecycle signal, tagged with the attempt it belongs to.
#[derive(Debug)]
pub struct LinkSignal {
    generation: u64,
    event: LinkEvent,
}

#[derive(Debug)]
enum LinkEvent {
    Opened(mpsc::UnboundedSender<String>),
    Frame(String),
    Closed,
    Failed(String),
}

impl From<SocketEvent> for LinkEvent {
    fn from(event: SocketEvent) -> Self {
        match event {
            SocketEvent::Frame(text) => LinkEvent::Frame(text),
            SocketEvent::Closed => LinkEvent::Closed,
            SocketEvent::Error(reason) => LinkEvent::Failed(reason),
        }
    }
}

/// Owns the socket, the status, the reconnect timer and the handler table.
///
/// `S` is the state inbound handlers mutate; the owner passes it to
/// [`handle_signal`](Self::handle_signal).
pub struct ConnectionManager<S> {
    transport: Arc<dyn Transport>,
    endpoint: String,
    status: watch::Sender<ConnectionStatus>,
    router: MessageRouter<S>,
    /// Writer half of the open socket
    outgoing: Option<mpsc::UnboundedSender<String>>,
    /// Attempt counter; signals from older attempts are stale
    generation: u64,
    /// Open-and-forward task of the current attempt
    pump: Option<JoinHandle<()>>,
    opening: bool,
    /// Bound on `Transport::open`; expiry counts as a socket error
    handshake_timeout: Duration,
    reconnect: Timer,
    /// Set by `disconnect()`, cleared by `connect()`
    halted: bool,
    signal_tx: mpsc::UnboundedSender<LinkSignal>,
    signal_rx: mpsc::UnboundedReceiver<LinkSignal>,
}

impl<S> ConnectionManager<S> {
    /// Create a manager for `endpoint`. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            endpoint: endpoint.into(),
            status: watch::Sender::new(ConnectionStatus::connecting()),
            router: MessageRouter::new(),
            outgoing: None,
            generation: 0,
            pump: None,
            opening: false,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            reconnect: Timer::new(reconnect_delay),
            halted: false,
            signal_tx,
            signal_rx,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Register `handler` for `kind`, replacing any existing one.
    pub fn register_handler<F>(&mut self, kind: MessageType, handler: F) -> bool
    where
        F: FnMut(&Message, &mut S) -> Result<(), HandlerError> + Send + 'static,
    {
        self.router.register_handler(kind, handler)
    }

    pub fn unregister_handler(&mut self, kind: MessageType) -> bool {
        self.router.unregister_handler(kind)
    }

    pub fn router_mut(&mut self) -> &mut MessageRouter<S> {
        &mut self.router
    }

    /// Open a socket to the endpoint.
    ///
    /// Does nothing if a socket is already open or being opened.
    pub fn connect(&mut self) {
        self.halted = false;
        self.reconnect.cancel();

        if self.outgoing.is_some() || self.opening {
            log::debug!("Connect ignored: socket already open or opening");
            return;
        }

        self.generation += 1;
        self.opening = true;
        self.set_status(ConnectionStatus::connecting());
        log::info!("Connecting to {} (attempt {})", self.endpoint, self.generation);

        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        let signals = self.signal_tx.clone();
        let handshake_timeout = self.handshake_timeout;

        if let Some(old) = self.pump.take() {
            old.abort();
        }
        self.pump = Some(tokio::spawn(async move {
            let post = |event: LinkEvent| signals.send(LinkSignal { generation, event }).is_ok();

            let opened = tokio::time::timeout(handshake_timeout, transport.open(&endpoint)).await;
            let mut link = match opened {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => {
                    post(LinkEvent::Failed(e.to_string()));
                    return;
                }
                Err(_) => {
                    post(LinkEvent::Failed(format!(
                        "handshake timed out after {handshake_timeout:?}"
                    )));
                    return;
                }
            };
            if !post(LinkEvent::Opened(link.outgoing)) {
                return;
            }

            let mut ended = false;
            while let Some(event) = link.incoming.recv().await {
                ended |= !matches!(event, SocketEvent::Frame(_));
                if !post(event.into()) {
                    return;
                }
            }
            if !ended {
                post(LinkEvent::Closed);
            }
        }));
    }

    /// Wait for the next socket signal.
    pub async fn next_signal(&mut self) -> LinkSignal {
        // The manager holds a sender, so the channel never closes.
        match self.signal_rx.recv().await {
            Some(signal) => signal,
            None => std::future::pending().await,
        }
    }

    /// Apply a socket signal: status transitions, reconnect scheduling, and
    /// dispatch of inbound frames to the handler table.
    ///
    /// Returns how an inbound frame was routed, or `None` for lifecycle and
    /// stale signals.
    pub fn handle_signal(&mut self, signal: LinkSignal, state: &mut S) -> Option<Dispatch> {
        if self.halted || signal.generation != self.generation {
            log::trace!("Dropping stale socket signal from attempt {}", signal.generation);
            return None;
        }

        match signal.event {
            LinkEvent::Opened(outgoing) => {
                self.opening = false;
                self.outgoing = Some(outgoing);
                self.set_status(ConnectionStatus::connected());
                log::info!("Connected to {}", self.endpoint);
            }
            LinkEvent::Frame(text) => return Some(self.handle_frame(&text, state)),
            LinkEvent::Closed => {
                log::info!("Connection to {} closed", self.endpoint);
                self.drop_socket();
                self.set_status(ConnectionStatus::disconnected());
                self.schedule_reconnect();
            }
            LinkEvent::Failed(reason) => {
                log::warn!("Connection to {} failed: {reason}", self.endpoint);
                self.drop_socket();
                self.set_status(ConnectionStatus::error());
                self.schedule_reconnect();
            }
        }
        None
    }

    fn handle_frame(&mut self, text: &str, state: &mut S) -> Dispatch {
        match Message::decode(text) {
            Ok(message) => self.router.dispatch(&message, state),
            Err(e) => {
                log::warn!("Discarding frame: {e}");
                Dispatch::Failed
            }
        }
    }

    /// Serialize and write `message` if connected.
    ///
    /// While not connected this is a silent no-op; nothing is queued.
    /// Returns whether the frame was handed to the socket.
    pub fn send(&self, message: &Message) -> bool {
        let Some(outgoing) = self.outgoing.as_ref().filter(|_| self.is_connected()) else {
            log::trace!("Not connected, dropping {} frame", message.kind);
            return false;
        };

        match message.encode() {
            Ok(frame) => outgoing.send(frame).is_ok(),
            Err(e) => {
                log::warn!("Could not send {} frame: {e}", message.kind);
                false
            }
        }
    }

    /// When the pending reconnect fires, if any.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect.deadline()
    }

    /// Called when the reconnect deadline passes.
    pub fn on_reconnect_timer(&mut self) {
        if self.reconnect.take_if_due(Instant::now()) && !self.halted {
            self.connect();
        }
    }

    /// Cancel any pending reconnect and close the socket. The only way to
    /// stop the manager from reconnecting.
    pub fn disconnect(&mut self) {
        self.reconnect.cancel();
        self.halted = true;
        self.drop_socket();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        // Invalidate signals already in flight.
        self.generation += 1;
        self.set_status(ConnectionStatus::stopped());
        log::info!("Disconnected from {}", self.endpoint);
    }

    fn drop_socket(&mut self) {
        self.outgoing = None;
        self.opening = false;
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.schedule(Instant::now()) {
            log::debug!("Replaced pending reconnect");
        }
        log::info!("Reconnecting in {:?}", self.reconnect.delay());
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }
}

impl<S> Drop for ConnectionManager<S> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

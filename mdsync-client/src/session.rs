//! One collaborative editing session.
//!
//! ```text
//!  Session (handle) ── Command ──► driver task ◄── LinkSignal ── socket pump
//!        ▲                          │   │   │
//!        │ watch<ConnectionStatus>  │   │   └─ reconnect deadline
//!        └──────────────────────────┘   └───── edit window deadline
//!        ◄── SessionEvent ───────────────┘
//! ```
//!
//! All state (document, cursors, socket, both timers) is owned by the driver
//! task and touched by nothing else, so commands, inbound frames and timer
//! expiries are handled strictly one at a time.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::coalesce::EditCoalescer;
use crate::config::SessionConfig;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::document::LocalDocument;
use crate::presence::{build_cursor_overlay, CursorInfo, CursorRegistry, CursorRenderData, GlyphMetrics};
use crate::protocol::{Message, MessageType};
use crate::router::{Dispatch, Handler, HandlerError};
use crate::timer::sleep_until_deadline;
use crate::transport::{Transport, WebSocketTransport};

const EVENT_CAPACITY: usize = 256;

/// Something a frame handler changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server's content replaced the local buffer.
    DocumentReplaced { content: String },
    /// The server sent a new preview (or cleared it).
    PreviewUpdated { rendered_html: Option<String> },
    CursorMoved { user_id: String, position: usize },
    CursorLeft { user_id: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session driver has stopped")]
    Closed,
}

/// State inbound handlers operate on.
pub struct SessionState {
    document: LocalDocument,
    cursors: CursorRegistry,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionState {
    pub fn document(&self) -> &LocalDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut LocalDocument {
        &mut self.document
    }

    pub fn cursors(&self) -> &CursorRegistry {
        &self.cursors
    }

    pub fn cursors_mut(&mut self) -> &mut CursorRegistry {
        &mut self.cursors
    }

    /// Publish an event. Dropped if nobody keeps up.
    pub fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            log::warn!("Event channel full, dropping {event:?}; use a snapshot to resync");
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Default handlers
// ───────────────────────────────────────────────────────────────────

/// `init` and `update`: last writer wins, no merge.
fn apply_document(message: &Message, state: &mut SessionState) -> Result<(), HandlerError> {
    let content = message.content.as_deref().ok_or(HandlerError::MissingField {
        kind: message.kind,
        field: "content",
    })?;

    if state.document.apply_remote(content) {
        state.emit(SessionEvent::DocumentReplaced {
            content: content.to_owned(),
        });
    }
    if state.document.rendered_html() != message.rendered_html.as_deref() {
        state.document.set_preview(message.rendered_html.clone());
        state.emit(SessionEvent::PreviewUpdated {
            rendered_html: message.rendered_html.clone(),
        });
    }
    Ok(())
}

fn apply_cursor(message: &Message, state: &mut SessionState) -> Result<(), HandlerError> {
    let user_id = required_user_id(message)?;
    if user_id == state.cursors.local_user_id() {
        return Ok(());
    }
    // Zero positions are omitted on the wire.
    let position = message.position.unwrap_or(0);
    state.cursors.update_cursor(user_id, position);
    state.emit(SessionEvent::CursorMoved {
        user_id: user_id.to_owned(),
        position,
    });
    Ok(())
}

fn apply_cursor_disconnect(message: &Message, state: &mut SessionState) -> Result<(), HandlerError> {
    let user_id = required_user_id(message)?;
    if state.cursors.remove_cursor(user_id).is_some() {
        state.emit(SessionEvent::CursorLeft {
            user_id: user_id.to_owned(),
        });
    }
    Ok(())
}

fn required_user_id(message: &Message) -> Result<&str, HandlerError> {
    message.user_id.as_deref().ok_or(HandlerError::MissingField {
        kind: message.kind,
        field: "userId",
    })
}

fn register_default_handlers(manager: &mut ConnectionManager<SessionState>) {
    manager.register_handler(MessageType::Init, apply_document);
    manager.register_handler(MessageType::Update, apply_document);
    manager.register_handler(MessageType::Cursor, apply_cursor);
    manager.register_handler(MessageType::CursorDisconnect, apply_cursor_disconnect);
}

// ───────────────────────────────────────────────────────────────────
// Snapshot
// ───────────────────────────────────────────────────────────────────

/// Point-in-time copy of the session's observable state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub content: String,
    pub caret: usize,
    pub rendered_html: Option<String>,
    /// Other users' carets, sorted by user id.
    pub cursors: Vec<CursorInfo>,
}

impl SessionSnapshot {
    /// Pixel layout of the other users' carets over the current content.
    pub fn overlay(&self, metrics: &GlyphMetrics) -> Vec<CursorRenderData> {
        build_cursor_overlay(&self.cursors, &self.content, metrics)
    }
}

// ───────────────────────────────────────────────────────────────────
// Driver
// ───────────────────────────────────────────────────────────────────

enum Command {
    Connect,
    Disconnect,
    Edit { text: String, caret: usize },
    MoveCaret(usize),
    Send(Message),
    Register(MessageType, Handler<SessionState>),
    Unregister(MessageType),
    ClearCursors,
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

struct Driver {
    user_id: String,
    manager: ConnectionManager<SessionState>,
    state: SessionState,
    coalescer: EditCoalescer,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    fn new(
        config: &SessionConfig,
        transport: Arc<dyn Transport>,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let mut manager = ConnectionManager::new(transport, &config.endpoint, config.reconnect_delay)
            .with_handshake_timeout(config.handshake_timeout);
        register_default_handlers(&mut manager);

        Self {
            user_id: config.user_id.clone(),
            manager,
            state: SessionState {
                document: LocalDocument::new(),
                cursors: CursorRegistry::new(&config.user_id),
                events,
            },
            coalescer: EditCoalescer::new(config.edit_window),
            commands,
        }
    }

    async fn run(mut self) {
        while self.step().await {}

        log::debug!("Session handle dropped, shutting down");
        self.manager.disconnect();
    }

    /// Handle the next command, socket signal or timer expiry. The two
    /// timers are polled independently; neither one touches the other.
    /// Returns `false` once the handle is gone.
    async fn step(&mut self) -> bool {
        let reconnect_at = self.manager.reconnect_deadline();
        let flush_at = self.coalescer.deadline();

        tokio::select! {
            command = self.commands.recv() => match command {
                Some(command) => self.handle_command(command),
                None => return false,
            },
            signal = self.manager.next_signal() => {
                if let Some(Dispatch::Failed) = self.manager.handle_signal(signal, &mut self.state) {
                    log::debug!("Inbound frame rejected, document unchanged");
                }
            }
            _ = sleep_until_deadline(reconnect_at) => {
                self.manager.on_reconnect_timer();
            }
            _ = sleep_until_deadline(flush_at) => {
                self.flush();
            }
        }
        true
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.manager.connect(),
            Command::Disconnect => {
                self.manager.disconnect();
                self.coalescer.cancel();
                self.state.cursors.clear_cursors();
            }
            Command::Edit { text, caret } => {
                self.state.document.set_local(text, caret);
                self.coalescer.note_edit(Instant::now());
            }
            Command::MoveCaret(caret) => {
                let caret = self.state.document.set_caret(caret);
                self.manager.send(&Message::cursor(&self.user_id, caret));
            }
            Command::Send(message) => {
                self.manager.send(&message);
            }
            Command::Register(kind, handler) => {
                self.manager.router_mut().register_boxed(kind, handler);
            }
            Command::Unregister(kind) => {
                self.manager.unregister_handler(kind);
            }
            Command::ClearCursors => self.state.cursors.clear_cursors(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn flush(&mut self) {
        self.coalescer.fire(
            Instant::now(),
            &self.state.document,
            &self.user_id,
            &mut self.manager,
        );
    }

    fn snapshot(&self) -> SessionSnapshot {
        let document = &self.state.document;
        let mut cursors: Vec<CursorInfo> = self.state.cursors.other_cursors().cloned().collect();
        cursors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        SessionSnapshot {
            status: self.manager.status(),
            content: document.text().to_owned(),
            caret: document.caret(),
            rendered_html: document.rendered_html().map(str::to_owned),
            cursors,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Handle
// ───────────────────────────────────────────────────────────────────

/// Handle to a running session. Dropping it disconnects.
pub struct Session {
    user_id: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    task: JoinHandle<()>,
}

impl Session {
    /// Start a session over WebSocket. Must be called inside a tokio
    /// runtime. Nothing is opened until [`connect`](Self::connect).
    pub fn start(config: SessionConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport))
    }

    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        let driver = Driver::new(&config, transport, command_rx, event_tx);
        let status = driver.manager.subscribe();
        log::info!("Starting session {} for {}", config.user_id, config.endpoint);

        Self {
            user_id: config.user_id,
            commands: command_tx,
            status,
            events: Some(event_rx),
            task: tokio::spawn(driver.run()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn connect(&self) -> Result<(), SessionError> {
        self.command(Command::Connect)
    }

    /// Stop reconnecting, close the socket, and forget remote cursors.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.command(Command::Disconnect)
    }

    /// Record a local edit: the full new text and the caret after it.
    pub fn edit(&self, text: impl Into<String>, caret: usize) -> Result<(), SessionError> {
        self.command(Command::Edit {
            text: text.into(),
            caret,
        })
    }

    /// Move the local caret without editing. Broadcast immediately.
    pub fn move_caret(&self, caret: usize) -> Result<(), SessionError> {
        self.command(Command::MoveCaret(caret))
    }

    /// Send a raw frame. Dropped silently while not connected.
    pub fn send(&self, message: Message) -> Result<(), SessionError> {
        self.command(Command::Send(message))
    }

    /// Replace the handler for `kind`, including the built-in ones.
    pub fn register_handler<F>(&self, kind: MessageType, handler: F) -> Result<(), SessionError>
    where
        F: FnMut(&Message, &mut SessionState) -> Result<(), HandlerError> + Send + 'static,
    {
        self.command(Command::Register(kind, Box::new(handler)))
    }

    pub fn unregister_handler(&self, kind: MessageType) -> Result<(), SessionError> {
        self.command(Command::Unregister(kind))
    }

    pub fn clear_cursors(&self) -> Result<(), SessionError> {
        self.command(Command::ClearCursors)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Disconnect and wait for the driver to finish.
    pub async fn shutdown(self) {
        let Session { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            log::error!("Session driver failed: {e}");
        }
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

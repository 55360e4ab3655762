//! # mdsync-client — Session layer for a collaborative text editor
//!
//! Keeps one resilient WebSocket connection to a shared document session,
//! broadcasts local edits on a debounce, applies remote content by
//! last-writer-wins overwrite, and tracks the other users' carets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   Command    ┌──────────────────────────────────────┐
//! │ Session     │ ───────────► │ driver task                          │
//! │ (handle)    │ ◄─────────── │  ConnectionManager ── MessageRouter  │
//! └─────────────┘ status/events│        │                 │           │
//!                              │  EditCoalescer     CursorRegistry    │
//!                              └────────┬─────────────────────────────┘
//!                                       │ JSON frames
//!                                       ▼
//!                              ┌──────────────────┐
//!                              │ Transport        │
//!                              │ (WebSocket)      │
//!                              └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire frames
//! - [`router`] — per-type handler table
//! - [`connection`] — socket lifecycle, status, reconnect timer
//! - [`coalesce`] — debounced edit broadcast
//! - [`presence`] — cursor registry, colors, offset mapping, overlay layout
//! - [`document`] — local text buffer
//! - [`session`] — the driver task and its handle
//! - [`transport`] — socket seam and the tokio-tungstenite implementation
//!
//! ## Example
//!
//! ```no_run
//! use mdsync_client::{Session, SessionConfig};
//!
//! # async fn run() -> Result<(), mdsync_client::SessionError> {
//! let mut session = Session::start(SessionConfig::new("ws://localhost:8888/ws"));
//! let mut events = session.take_events().expect("first call");
//! session.connect()?;
//! session.edit("# Hello", 7)?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod coalesce;
pub mod config;
pub mod connection;
pub mod document;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod session;
pub mod timer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use coalesce::{EditCoalescer, Outbound};
pub use config::{
    generate_user_id, SessionConfig, DEFAULT_ENDPOINT, EDIT_WINDOW, HANDSHAKE_TIMEOUT, RECONNECT_DELAY,
};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, LinkSignal};
pub use document::{utf16_len, LocalDocument};
pub use presence::{
    build_cursor_overlay, calculate_cursor_position, CursorColor, CursorInfo, CursorPosition,
    CursorRegistry, CursorRenderData, GlyphMetrics,
};
pub use protocol::{Message, MessageType, ProtocolError};
pub use router::{Dispatch, Handler, HandlerError, MessageRouter};
pub use session::{Session, SessionError, SessionEvent, SessionSnapshot, SessionState};
pub use transport::{Link, SocketEvent, Transport, TransportError, WebSocketTransport};

//! JSON wire protocol shared with the collaboration server.
//!
//! Every frame is a single JSON object with a `type` discriminant and a
//! handful of optional fields:
//!
//! ```text
//! {
//!   "type": "init" | "update" | "cursor" | "cursor_disconnect",
//!   "content":      "full document text",
//!   "renderedHtml": "server-rendered preview",
//!   "userId":       "user_k3j9x0a",
//!   "position":     42
//! }
//! ```
//!
//! `content` and `renderedHtml` always describe the whole document, never a
//! diff. Absent fields are omitted when encoding; unknown fields are ignored
//! when decoding so older clients keep working against newer servers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Message types for the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Full document state, sent once by the server after connect
    Init,
    /// Full document state, sent by either side after an edit
    Update,
    /// A user's caret offset
    Cursor,
    /// A user left the session
    CursorDisconnect,
    /// Any `type` this client does not understand
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Wire name of the type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Update => "update",
            Self::Cursor => "cursor",
            Self::CursorDisconnect => "cursor_disconnect",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Flat caret offset in UTF-16 code units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl Message {
    fn empty(kind: MessageType) -> Self {
        Self {
            kind,
            content: None,
            rendered_html: None,
            user_id: None,
            position: None,
        }
    }

    /// Create an init message carrying the whole document.
    pub fn init(content: impl Into<String>, rendered_html: Option<String>) -> Self {
        Self {
            content: Some(content.into()),
            rendered_html,
            ..Self::empty(MessageType::Init)
        }
    }

    /// Create an update message carrying the whole document.
    pub fn update(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::empty(MessageType::Update)
        }
    }

    /// Create a caret position broadcast.
    pub fn cursor(user_id: impl Into<String>, position: usize) -> Self {
        Self {
            user_id: Some(user_id.into()),
            position: Some(position),
            ..Self::empty(MessageType::Cursor)
        }
    }

    /// Create a departure notice for `user_id`.
    pub fn cursor_disconnect(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::empty(MessageType::CursorDisconnect)
        }
    }

    /// Attach server-rendered preview HTML.
    pub fn with_rendered_html(mut self, html: impl Into<String>) -> Self {
        self.rendered_html = Some(html.into());
        self
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
}

//! Session configuration.

use std::time::Duration;

/// Endpoint the bundled server listens on.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8888/ws";
/// Delay before reopening a closed or failed socket.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);
/// Quiescence window for local edits.
pub const EDIT_WINDOW: Duration = Duration::from_millis(300);
/// Longest a socket may take to open before the attempt counts as failed.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// WebSocket URL of the document session
    pub endpoint: String,
    /// Identifier sent in `cursor` frames
    pub user_id: String,
    pub reconnect_delay: Duration,
    pub edit_window: Duration,
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            user_id: generate_user_id(),
            reconnect_delay: RECONNECT_DELAY,
            edit_window: EDIT_WINDOW,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_edit_window(mut self, window: Duration) -> Self {
        self.edit_window = window;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// A fresh `user_` id with seven random base-16 characters.
pub fn generate_user_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("user_{}", &id[..7])
}

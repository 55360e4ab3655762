//! Per-type dispatch of decoded frames.
//!
//! At most one handler is registered per [`MessageType`]. Frames of a type
//! with no handler are dropped. A handler that returns an error or panics is
//! contained here and never reaches the socket callback chain.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

use crate::protocol::{Message, MessageType};

/// A frame handler. `S` is the state the handler is allowed to mutate.
pub type Handler<S> = Box<dyn FnMut(&Message, &mut S) -> Result<(), HandlerError> + Send>;

/// Why a handler rejected a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{kind} frame is missing `{field}`")]
    MissingField {
        kind: MessageType,
        field: &'static str,
    },
    #[error("{0}")]
    Rejected(String),
}

/// Result of routing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// No handler registered for the frame's type.
    Dropped,
    /// The handler returned an error or panicked.
    Failed,
}

pub struct MessageRouter<S> {
    handlers: HashMap<MessageType, Handler<S>>,
}

impl<S> MessageRouter<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`, replacing any existing one.
    ///
    /// Returns `true` if a previous handler was replaced.
    pub fn register_handler<F>(&mut self, kind: MessageType, handler: F) -> bool
    where
        F: FnMut(&Message, &mut S) -> Result<(), HandlerError> + Send + 'static,
    {
        self.register_boxed(kind, Box::new(handler))
    }

    pub(crate) fn register_boxed(&mut self, kind: MessageType, handler: Handler<S>) -> bool {
        self.handlers.insert(kind, handler).is_some()
    }

    /// Remove the handler for `kind`. Returns `true` if one was registered.
    pub fn unregister_handler(&mut self, kind: MessageType) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    pub fn has_handler(&self, kind: MessageType) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route `message` to its handler.
    pub fn dispatch(&mut self, message: &Message, state: &mut S) -> Dispatch {
        let Some(handler) = self.handlers.get_mut(&message.kind) else {
            log::trace!("No handler for {} frame, dropping", message.kind);
            return Dispatch::Dropped;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(message, state))) {
            Ok(Ok(())) => Dispatch::Handled,
            Ok(Err(e)) => {
                log::warn!("Handler for {} frame failed: {e}", message.kind);
                Dispatch::Failed
            }
            Err(_) => {
                log::error!("Handler for {} frame panicked", message.kind);
                Dispatch::Failed
            }
        }
    }
}

impl<S> Default for MessageRouter<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for MessageRouter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(MessageType::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("MessageRouter").field("handlers", &kinds).finish()
    }
}

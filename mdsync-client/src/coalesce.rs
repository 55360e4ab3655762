//! Debounced broadcast of local edits.
//!
//! Every local edit restarts a quiescence window. When the window closes
//! without another edit, the final text goes out as one `update` (only if it
//! differs from what was last sent) followed by one `cursor` with the caret.
//! Intermediate states are never sent.

use std::time::Duration;
use tokio::time::Instant;

use crate::connection::ConnectionManager;
use crate::document::LocalDocument;
use crate::protocol::Message;
use crate::timer::Timer;

/// Where coalesced frames are written.
pub trait Outbound {
    /// Write one frame. Returns `false` if it was dropped.
    fn deliver(&mut self, message: &Message) -> bool;
}

impl<S> Outbound for ConnectionManager<S> {
    fn deliver(&mut self, message: &Message) -> bool {
        self.send(message)
    }
}

#[derive(Debug, Clone)]
pub struct EditCoalescer {
    timer: Timer,
    /// Content of the last `update` the socket accepted
    last_sent: String,
}

impl EditCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            timer: Timer::new(window),
            last_sent: String::new(),
        }
    }

    /// Start or restart the quiescence window.
    pub fn note_edit(&mut self, now: Instant) {
        self.timer.schedule(now);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn cancel(&mut self) -> bool {
        self.timer.cancel()
    }

    pub fn last_sent(&self) -> &str {
        &self.last_sent
    }

    /// Flush if the window has closed at `now`. Returns `true` if it had.
    pub fn fire(
        &mut self,
        now: Instant,
        document: &LocalDocument,
        user_id: &str,
        out: &mut impl Outbound,
    ) -> bool {
        if !self.timer.take_if_due(now) {
            return false;
        }

        if document.text() != self.last_sent {
            if out.deliver(&Message::update(document.text())) {
                self.last_sent = document.text().to_owned();
            } else {
                log::debug!("Update not sent, will retry after the next edit");
            }
        }
        out.deliver(&Message::cursor(user_id, document.caret()));
        true
    }
}

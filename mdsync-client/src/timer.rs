//! Single-slot cancellable deadlines.
//!
//! The session runs two of these (reconnect delay and edit window). Each
//! holds at most one pending deadline; scheduling again replaces it.

use std::future;
use std::time::Duration;
use tokio::time::{self, Instant};

#[derive(Debug, Clone)]
pub struct Timer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm the timer to fire `delay` after `now`, replacing any pending
    /// deadline. Returns `true` if a pending deadline was replaced.
    pub fn schedule(&mut self, now: Instant) -> bool {
        self.deadline.replace(now + self.delay).is_some()
    }

    /// Disarm. Returns `true` if a deadline was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Consume the deadline if it has passed at `now`.
    pub fn take_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
///
/// Used as a `select!` branch so a disarmed timer never wins.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

//! In-memory transport for driving the connection manager and session in
//! tests without a network.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::protocol::Message;
use crate::transport::{Link, SocketEvent, Transport, TransportError};

/// Records every `open` and hands out scripted sockets.
#[derive(Clone, Default)]
pub(crate) struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    attempts: usize,
    refuse: usize,
    stall: usize,
    sockets: Vec<Arc<MemorySocket>>,
}

impl MemoryTransport {
    /// Number of `open` calls so far, refused ones included.
    pub(crate) fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }

    /// Refuse the next `count` opens.
    pub(crate) fn refuse_next(&self, count: usize) {
        self.inner.lock().unwrap().refuse = count;
    }

    /// Leave the next `count` opens pending forever, like a server that
    /// accepts TCP and never answers the upgrade.
    pub(crate) fn stall_next(&self, count: usize) {
        self.inner.lock().unwrap().stall = count;
    }

    /// The `index`th successfully opened socket.
    pub(crate) fn socket(&self, index: usize) -> Arc<MemorySocket> {
        Arc::clone(&self.inner.lock().unwrap().sockets[index])
    }

    pub(crate) fn sockets(&self) -> usize {
        self.inner.lock().unwrap().sockets.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError> {
        if self.begin_open() {
            return std::future::pending().await;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.refuse > 0 {
            inner.refuse -= 1;
            return Err(TransportError::Connect {
                endpoint: endpoint.to_owned(),
                reason: "connection refused".into(),
            });
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        inner.sockets.push(Arc::new(MemorySocket {
            to_client: in_tx,
            from_client: Mutex::new(out_rx),
        }));
        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

impl MemoryTransport {
    /// Count the attempt; `true` if it should stall.
    fn begin_open(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        if inner.stall > 0 {
            inner.stall -= 1;
            return true;
        }
        false
    }
}

/// The server side of one in-memory socket.
pub(crate) struct MemorySocket {
    to_client: mpsc::UnboundedSender<SocketEvent>,
    from_client: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemorySocket {
    pub(crate) fn deliver(&self, message: &Message) {
        self.deliver_raw(&message.encode().unwrap());
    }

    pub(crate) fn deliver_raw(&self, frame: &str) {
        let _ = self.to_client.send(SocketEvent::Frame(frame.to_owned()));
    }

    pub(crate) fn close(&self) {
        let _ = self.to_client.send(SocketEvent::Closed);
    }

    pub(crate) fn fail(&self, reason: &str) {
        let _ = self.to_client.send(SocketEvent::Error(reason.to_owned()));
    }

    /// Frames the client has written since the last call.
    pub(crate) fn sent_raw(&self) -> Vec<String> {
        let mut rx = self.from_client.lock().unwrap();
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.sent_raw()
            .iter()
            .map(|frame| Message::decode(frame).unwrap())
            .collect()
    }

    /// Whether the client dropped its writer.
    pub(crate) fn closed_by_client(&self) -> bool {
        self.from_client.lock().unwrap().is_closed()
    }
}

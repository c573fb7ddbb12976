use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Notify;

/// A single already-encoded wire frame, shared cheaply across every
/// recipient of a broadcast without re-serializing per participant.
pub type WireFrame = Arc<str>;

/// The minimal interface the registry needs onto a connection's outbound
/// side, per spec.md §9's "Socket abstraction": `send`, `close`,
/// `is_open`. The connection task (owned by `huddle-server`) holds the
/// paired receiver and `Notify` listener; the registry only ever sees
/// this handle, never the socket itself, which keeps participants free
/// of a cycle back to the dispatcher.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<WireFrame>,
    close: Arc<Notify>,
}

impl OutboundHandle {
    /// Construct a handle paired with the receiver/close-listener that the
    /// connection task owns.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WireFrame>, Arc<Notify>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let close = Arc::new(Notify::new());
        (
            Self {
                tx,
                close: Arc::clone(&close),
            },
            rx,
            close,
        )
    }

    /// Enqueue a frame for delivery. Returns `false` if the socket is
    /// already gone; the caller should treat this as a no-op, not an
    /// error — the registry never learns about transport failures
    /// synchronously.
    pub fn send(&self, frame: WireFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Request that the connection task close the underlying socket.
    /// Used by kick/reject; the actual close happens asynchronously in
    /// the connection task's select loop.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Whether the outbound channel is still live.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

//! Transport attachment: the two shapes a session can deliver through.
//!
//! A *frame* transport stays open and receives one serialized envelope per
//! text frame, plus ping frames while idle. A *batch* transport can carry
//! exactly one response — a JSON array of envelopes — and detaches by
//! construction once that response is sent.
//!
//! Both sinks are non-blocking: the frame sink feeds a bounded channel
//! drained by the connection's outbound forwarder task, the batch sink is a
//! oneshot consumed by the held HTTP request.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::errors::DeliveryError;

/// Content type of every batch response.
pub const BATCH_CONTENT_TYPE: &str = "application/json";

/// Body of a batch response with nothing to say.
pub const EMPTY_BATCH_BODY: &str = "[]";

/// Which shape a transport is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent bidirectional frame socket.
    Frame,
    /// Single-shot long-poll response.
    Batch,
}

/// One outbound unit on a frame transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A serialized envelope.
    Text(Arc<String>),
    /// Idle probe; the payload is the decimal ASCII of the current epoch
    /// millisecond.
    Ping(String),
}

/// Write side of a frame transport.
#[derive(Debug)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
}

impl FrameSink {
    /// Wrap an existing channel sender.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    /// Build a sink plus the receiver its forwarder task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Whether the peer end is still draining.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Hand a frame to the forwarder without blocking.
    pub fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::TransportBusy,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::TransportClosed,
        })
    }
}

/// One complete batch response.
#[derive(Debug, PartialEq, Eq)]
pub struct BatchResponse {
    /// HTTP status.
    pub status: u16,
    /// Always [`BATCH_CONTENT_TYPE`].
    pub content_type: &'static str,
    /// JSON array of envelopes, possibly `[]`.
    pub body: String,
}

/// Write side of a batch transport. Sending consumes the sink, which is what
/// detaching means for this kind.
#[derive(Debug)]
pub struct BatchSink {
    tx: oneshot::Sender<BatchResponse>,
}

impl BatchSink {
    /// Build a sink plus the receiver the held request awaits.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<BatchResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Whether the held request is still waiting.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Emit the one and only response.
    pub fn send(self, body: String) -> Result<(), DeliveryError> {
        self.tx
            .send(BatchResponse {
                status: 200,
                content_type: BATCH_CONTENT_TYPE,
                body,
            })
            .map_err(|_| DeliveryError::TransportClosed)
    }
}

/// The current attachment of a session, tagged by shape.
#[derive(Debug)]
pub enum Transport {
    /// Persistent frame socket.
    Frame(FrameSink),
    /// Single-shot long poll.
    Batch(BatchSink),
}

impl Transport {
    /// Which shape this is.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Frame(_) => TransportKind::Frame,
            Self::Batch(_) => TransportKind::Batch,
        }
    }

    /// Whether the underlying channel can still accept a write.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Self::Frame(sink) => sink.is_active(),
            Self::Batch(sink) => sink.is_active(),
        }
    }
}

//! Error types for the delivery engine.
//!
//! Per the engine's propagation policy these are absorbed inside session
//! methods and surfaced through logs and state transitions; producers and
//! transport handlers never see them as return values. They exist as typed
//! values for the transport sinks, configuration validation, and log fields.

use thiserror::Error;

/// Which bounded-wait session lock an operation failed to acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    /// Guards the transport attachment.
    Attachment,
    /// Guards send-side coordinate assignment.
    SendSequence,
    /// Guards the receive-side high-water mark.
    ReceiveSequence,
}

impl LockKind {
    /// Stable label for logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::SendSequence => "send_sequence",
            Self::ReceiveSequence => "receive_sequence",
        }
    }
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures inside the delivery engine.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A session lock could not be acquired within the configured window.
    /// Recovered locally: the operation is skipped.
    #[error("{lock} lock not acquired within {timeout_ms}ms")]
    LockTimeout {
        /// The lock that timed out.
        lock: LockKind,
        /// The configured bound.
        timeout_ms: u64,
    },

    /// The transport handle reports closed. The attachment is dropped;
    /// strong messages stay queued for the next attach.
    #[error("transport channel is closed")]
    TransportClosed,

    /// The frame sink's buffer is full. The attachment is treated as broken.
    #[error("transport send buffer is full")]
    TransportBusy,

    /// Rejected configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong.
        message: String,
    },
}

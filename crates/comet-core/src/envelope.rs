//! The wire envelope and the queued message record.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coord::Coord;

/// Envelope metadata: the message's coordinate in wire form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Epoch milliseconds at enqueue.
    pub timestamp: i64,
    /// Sequence within the millisecond.
    pub sequence: u32,
}

impl From<Coord> for Metadata {
    fn from(coord: Coord) -> Self {
        Self {
            timestamp: coord.timestamp_ms,
            sequence: coord.sequence,
        }
    }
}

impl From<Metadata> for Coord {
    fn from(metadata: Metadata) -> Self {
        Coord::new(metadata.timestamp, metadata.sequence)
    }
}

/// One outbound message as it crosses the wire:
/// `{"metadata": {"timestamp": …, "sequence": …}, "data": …}`.
///
/// Frame transports emit one envelope per text frame; batch transports emit
/// a JSON array of envelopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Coordinate metadata.
    pub metadata: Metadata,
    /// Opaque payload.
    pub data: Value,
}

impl Envelope {
    /// Wrap a payload with its assigned coordinate.
    #[must_use]
    pub fn new(coord: Coord, data: Value) -> Self {
        Self {
            metadata: coord.into(),
            data,
        }
    }
}

/// A message held in the dual queue. Immutable after construction.
///
/// Carries two independent expiry instants: past `strong_deadline_ms` the
/// message is no longer eligible for primary delivery; past
/// `soft_deadline_ms` it is not even replayable.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    envelope: Envelope,
    coord: Coord,
    strong_deadline_ms: i64,
    soft_deadline_ms: i64,
}

impl QueuedMessage {
    /// Build a message from its payload and lifetimes. Deadlines are
    /// anchored at the coordinate's timestamp.
    ///
    /// Callers must pass `soft_lifetime >= strong_lifetime`.
    #[must_use]
    pub fn new(
        data: Value,
        coord: Coord,
        strong_lifetime: Duration,
        soft_lifetime: Duration,
    ) -> Self {
        debug_assert!(soft_lifetime >= strong_lifetime);
        Self {
            envelope: Envelope::new(coord, data),
            coord,
            strong_deadline_ms: deadline(coord.timestamp_ms, strong_lifetime),
            soft_deadline_ms: deadline(coord.timestamp_ms, soft_lifetime),
        }
    }

    /// The wire envelope.
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// The assigned coordinate.
    #[must_use]
    pub fn coord(&self) -> Coord {
        self.coord
    }

    /// Instant after which primary delivery is off.
    #[must_use]
    pub fn strong_deadline_ms(&self) -> i64 {
        self.strong_deadline_ms
    }

    /// Instant after which even replay is off.
    #[must_use]
    pub fn soft_deadline_ms(&self) -> i64 {
        self.soft_deadline_ms
    }
}

fn deadline(base_ms: i64, lifetime: Duration) -> i64 {
    let lifetime_ms = i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX);
    base_ms.saturating_add(lifetime_ms)
}

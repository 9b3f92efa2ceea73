//! Message coordinates and the per-direction sequence clock.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a message within one session's stream: the enqueue wall-clock
/// millisecond plus a tiebreaking sequence within that millisecond.
///
/// Ordering is lexicographic — `(t1, s1) < (t2, s2)` iff `t1 < t2`, or
/// `t1 == t2` and `s1 < s2` — which the field order encodes directly.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Coord {
    /// Epoch milliseconds at enqueue.
    pub timestamp_ms: i64,
    /// Tiebreaker within the millisecond.
    pub sequence: u32,
}

impl Coord {
    /// The origin coordinate. Clients that reconnect without a last-seen
    /// position are treated as starting here.
    pub const ZERO: Coord = Coord {
        timestamp_ms: 0,
        sequence: 0,
    };

    /// Build a coordinate from its parts.
    #[must_use]
    pub fn new(timestamp_ms: i64, sequence: u32) -> Self {
        Self {
            timestamp_ms,
            sequence,
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.timestamp_ms, self.sequence)
    }
}

/// Monotonic `(timestamp, sequence)` generator and high-water tracker.
///
/// The send side calls [`assign_next`](Self::assign_next) under the session's
/// send lock; the receive side calls [`observe`](Self::observe) to record the
/// furthest coordinate acknowledged by the client.
///
/// Successive assignments are strictly increasing even if the wall clock
/// stalls or steps backwards: the clock never regresses past its last
/// assigned millisecond, it keeps incrementing the sequence there instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceClock {
    last_timestamp_ms: i64,
    last_sequence: u32,
}

impl SequenceClock {
    /// A clock at the origin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next coordinate for the given wall-clock reading.
    ///
    /// A later millisecond resets the sequence to 0; the same (or an earlier)
    /// millisecond increments the sequence within the last assigned one.
    pub fn assign_next(&mut self, now_ms: i64) -> Coord {
        if now_ms > self.last_timestamp_ms {
            self.last_timestamp_ms = now_ms;
            self.last_sequence = 0;
        } else {
            self.last_sequence += 1;
        }
        Coord::new(self.last_timestamp_ms, self.last_sequence)
    }

    /// Advance to `coord` if it is strictly greater than the current
    /// position; otherwise no-op.
    pub fn observe(&mut self, coord: Coord) {
        if coord > self.current() {
            self.last_timestamp_ms = coord.timestamp_ms;
            self.last_sequence = coord.sequence;
        }
    }

    /// The last assigned or observed coordinate.
    #[must_use]
    pub fn current(&self) -> Coord {
        Coord::new(self.last_timestamp_ms, self.last_sequence)
    }
}

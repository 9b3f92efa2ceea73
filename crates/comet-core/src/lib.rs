//! # comet-core
//!
//! Per-session outbound message delivery engine bridging two transport
//! modalities — a persistent frame socket and single-shot long-poll batches —
//! behind one logical client identity.
//!
//! The building blocks, leaves first:
//!
//! - **Coordinates**: `(timestamp_ms, sequence)` pairs assigned by a
//!   monotonic [`SequenceClock`](coord::SequenceClock)
//! - **Envelopes**: the JSON wire form `{metadata, data}` plus the queued
//!   message record carrying its two expiry instants
//! - **Dual queue**: a strong FIFO of undelivered messages and a size-capped
//!   soft FIFO of recently enqueued messages eligible for best-effort replay
//! - **Transports**: a tagged [`Transport`](transport::Transport) enum over
//!   frame and batch sinks
//! - **Session**: the engine proper — `enqueue`, `skip`, `attach_and_replay`,
//!   `flush`, `tick` under bounded-wait locks
//! - **Registry**: `(user, guid) → Session` map with fan-out and reaping

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod coord;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod session;
pub mod transport;

pub use clock::{SystemClock, WallClock};
pub use config::EngineConfig;
pub use coord::{Coord, SequenceClock};
pub use envelope::{Envelope, Metadata, QueuedMessage};
pub use errors::{DeliveryError, LockKind};
pub use ids::{SessionGuid, SessionKey, UserId};
pub use queue::DualQueue;
pub use registry::Registry;
pub use session::Session;
pub use transport::{
    BatchResponse, BatchSink, Frame, FrameSink, Transport, TransportKind, BATCH_CONTENT_TYPE,
    EMPTY_BATCH_BODY,
};

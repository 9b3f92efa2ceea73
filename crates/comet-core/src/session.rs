//! The per-client delivery engine.
//!
//! A session owns one dual queue, one sequence clock per direction, the
//! current transport attachment and an idle deadline. Producers, the tick
//! scheduler and transport handlers call into it concurrently; every
//! mutation happens under one of three bounded-wait locks (attachment,
//! send-sequence, receive-sequence), so a contended lock costs a skipped
//! operation rather than an unbounded stall. The queue itself sits behind a
//! short-hold mutex that is never held across a transport write.
//!
//! All failures are absorbed here: logged, counted, and reflected in state
//! (typically by detaching), never returned to callers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::WallClock;
use crate::config::EngineConfig;
use crate::coord::{Coord, SequenceClock};
use crate::envelope::{Envelope, QueuedMessage};
use crate::errors::LockKind;
use crate::ids::{SessionGuid, UserId};
use crate::metrics::{
    LOCK_TIMEOUTS_TOTAL, MESSAGES_DELIVERED_TOTAL, MESSAGES_ENQUEUED_TOTAL,
    MESSAGES_EXPIRED_TOTAL, MESSAGES_REPLAYED_TOTAL, PINGS_SENT_TOTAL, WRITE_FAILURES_TOTAL,
};
use crate::queue::DualQueue;
use crate::transport::{BatchSink, Frame, FrameSink, Transport, TransportKind, EMPTY_BATCH_BODY};

/// Per-client engine bridging frame and batch transports over one message
/// stream.
pub struct Session {
    user: UserId,
    guid: SessionGuid,
    lock_timeout: Duration,
    clock: Arc<dyn WallClock>,
    queue: Mutex<DualQueue>,
    send_clock: Mutex<SequenceClock>,
    receive_clock: Mutex<SequenceClock>,
    attachment: Mutex<Option<Transport>>,
    /// Epoch ms past which an attached transport is considered idle.
    deadline_ms: AtomicI64,
}

impl Session {
    /// Create a detached session with empty queues.
    #[must_use]
    pub fn new(
        user: UserId,
        guid: SessionGuid,
        config: &EngineConfig,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            user,
            guid,
            lock_timeout: config.lock_timeout(),
            clock,
            queue: Mutex::new(DualQueue::new(config.soft_capacity)),
            send_clock: Mutex::new(SequenceClock::new()),
            receive_clock: Mutex::new(SequenceClock::new()),
            attachment: Mutex::new(None),
            deadline_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// The owning user.
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// The session GUID.
    #[must_use]
    pub fn guid(&self) -> &SessionGuid {
        &self.guid
    }

    /// Assign the next coordinate and append the payload to both queues.
    ///
    /// Returns the assigned coordinate, or `None` when the send lock timed
    /// out and the message was dropped. Enqueue never attempts delivery; a
    /// caller wanting immediate delivery follows with [`flush`](Self::flush).
    pub fn enqueue(
        &self,
        data: Value,
        strong_lifetime: Duration,
        soft_lifetime: Duration,
    ) -> Option<Coord> {
        let Some(mut send_clock) = self.send_clock.try_lock_for(self.lock_timeout) else {
            self.lock_timed_out(LockKind::SendSequence, "enqueue");
            return None;
        };
        let coord = send_clock.assign_next(self.clock.now_ms());
        let message = Arc::new(QueuedMessage::new(
            data,
            coord,
            strong_lifetime,
            soft_lifetime,
        ));
        self.queue.lock().enqueue(message);
        counter!(MESSAGES_ENQUEUED_TOTAL).increment(1);
        Some(coord)
    }

    /// Record the furthest coordinate the client acknowledged receiving.
    /// Lock timeout is a no-op.
    pub fn record_receive(&self, coord: Coord) {
        let Some(mut receive_clock) = self.receive_clock.try_lock_for(self.lock_timeout) else {
            self.lock_timed_out(LockKind::ReceiveSequence, "record_receive");
            return;
        };
        receive_clock.observe(coord);
    }

    /// The receive-side high-water mark.
    #[must_use]
    pub fn last_received(&self) -> Coord {
        self.receive_clock.lock().current()
    }

    /// Run expiry housekeeping, then discard everything at or before `coord`
    /// from both queues. This is how the client acknowledges delivery on
    /// reconnect.
    pub fn skip(&self, coord: Coord) {
        self.tick();
        self.queue.lock().skip_up_to(coord);
    }

    /// Attach a transport and replay recently delivered messages the client
    /// may have missed.
    ///
    /// The replay set is the soft-queue prefix strictly before the strong
    /// head, so it never duplicates a message the next flush will deliver
    /// primarily. A frame transport receives the replay as individual text
    /// frames and stays attached; a batch transport receives it as one JSON
    /// array (possibly `[]`) and detaches inside this call.
    pub fn attach_and_replay(&self, transport: Transport, last_seen: Coord) {
        self.skip(last_seen);

        let Some(mut attachment) = self.attachment.try_lock_for(self.lock_timeout) else {
            // The caller's transport will be reaped by its own idle timeout.
            self.lock_timed_out(LockKind::Attachment, "attach_and_replay");
            return;
        };
        let kind = transport.kind();
        let active = transport.is_active();
        *attachment = Some(transport);
        debug!(user = %self.user, guid = %self.guid, ?kind, "transport attached");
        if !active {
            return;
        }

        let replay = self.queue.lock().replay_soft_before_strong_head();
        match attachment.take() {
            Some(Transport::Frame(sink)) => {
                let sent = self.write_frames(&sink, &replay);
                counter!(MESSAGES_REPLAYED_TOTAL, "kind" => "frame").increment(sent);
                if sent == replay.len() as u64 {
                    *attachment = Some(Transport::Frame(sink));
                }
            }
            Some(Transport::Batch(sink)) => {
                let count = replay.len() as u64;
                if self.write_batch(sink, &replay) {
                    counter!(MESSAGES_REPLAYED_TOTAL, "kind" => "batch").increment(count);
                }
            }
            None => {}
        }
    }

    /// Deliver everything in the strong queue through the current
    /// attachment, in coordinate order.
    ///
    /// Frame kind: one text frame per message, attachment kept. Batch kind:
    /// one JSON array response, attachment consumed. Detached or inactive
    /// sessions flush to nothing and keep their strong queue.
    pub fn flush(&self) {
        self.tick();

        let Some(mut attachment) = self.attachment.try_lock_for(self.lock_timeout) else {
            self.lock_timed_out(LockKind::Attachment, "flush");
            return;
        };
        match attachment.take() {
            None => {}
            Some(Transport::Frame(sink)) => {
                if !sink.is_active() {
                    self.detached_inactive(TransportKind::Frame);
                    return;
                }
                let drained = self.queue.lock().drain_strong();
                let sent = self.write_frames(&sink, &drained);
                counter!(MESSAGES_DELIVERED_TOTAL, "kind" => "frame").increment(sent);
                if sent == drained.len() as u64 {
                    *attachment = Some(Transport::Frame(sink));
                }
            }
            Some(Transport::Batch(sink)) => {
                if !sink.is_active() {
                    self.detached_inactive(TransportKind::Batch);
                    return;
                }
                let drained = self.queue.lock().drain_strong();
                let count = drained.len() as u64;
                if self.write_batch(sink, &drained) {
                    counter!(MESSAGES_DELIVERED_TOTAL, "kind" => "batch").increment(count);
                }
            }
        }
    }

    /// Timeout processing: expire both queues, then probe or conclude an
    /// idle attachment once the deadline has passed.
    ///
    /// Past the deadline a frame transport gets a ping frame carrying the
    /// current epoch millisecond and stays attached; a batch transport gets
    /// the empty array response and detaches.
    pub fn tick(&self) {
        let now = self.clock.now_ms();
        let (strong_expired, _) = self.queue.lock().expire(now);
        if strong_expired > 0 {
            counter!(MESSAGES_EXPIRED_TOTAL).increment(strong_expired as u64);
        }

        if self.deadline_ms.load(Ordering::Acquire) >= now {
            return;
        }
        let Some(mut attachment) = self.attachment.try_lock_for(self.lock_timeout) else {
            self.lock_timed_out(LockKind::Attachment, "tick");
            return;
        };
        match attachment.take() {
            None => {}
            Some(Transport::Frame(sink)) => {
                if !sink.is_active() {
                    self.detached_inactive(TransportKind::Frame);
                    return;
                }
                match sink.send(Frame::Ping(now.to_string())) {
                    Ok(()) => {
                        counter!(PINGS_SENT_TOTAL).increment(1);
                        *attachment = Some(Transport::Frame(sink));
                    }
                    Err(e) => {
                        counter!(WRITE_FAILURES_TOTAL).increment(1);
                        warn!(user = %self.user, guid = %self.guid, error = %e,
                              "ping write failed, detaching");
                    }
                }
            }
            Some(Transport::Batch(sink)) => {
                if !sink.is_active() {
                    self.detached_inactive(TransportKind::Batch);
                    return;
                }
                if let Err(e) = sink.send(EMPTY_BATCH_BODY.to_owned()) {
                    counter!(WRITE_FAILURES_TOTAL).increment(1);
                    warn!(user = %self.user, guid = %self.guid, error = %e,
                          "empty batch response failed");
                }
            }
        }
    }

    /// Push the idle deadline `timeout` past now. Callers do this whenever
    /// they observe liveness: a fresh attach, an inbound message, a pong.
    /// Returns the new deadline in epoch ms.
    pub fn set_deadline(&self, timeout: Duration) -> i64 {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let deadline = self.clock.now_ms().saturating_add(timeout_ms);
        self.deadline_ms.store(deadline, Ordering::Release);
        deadline
    }

    /// The current idle deadline in epoch ms.
    #[must_use]
    pub fn deadline_ms(&self) -> i64 {
        self.deadline_ms.load(Ordering::Acquire)
    }

    /// Final housekeeping at shutdown: answer a pending batch transport with
    /// the empty array and drop whatever attachment remains.
    pub fn close(&self) {
        self.tick();
        let Some(mut attachment) = self.attachment.try_lock_for(self.lock_timeout) else {
            self.lock_timed_out(LockKind::Attachment, "close");
            return;
        };
        if let Some(Transport::Batch(sink)) = attachment.take() {
            if sink.is_active() {
                let _ = sink.send(EMPTY_BATCH_BODY.to_owned());
            }
        }
    }

    /// Whether a transport is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attachment.lock().is_some()
    }

    /// Shape of the current attachment, if any.
    #[must_use]
    pub fn attached_kind(&self) -> Option<TransportKind> {
        self.attachment.lock().as_ref().map(Transport::kind)
    }

    /// Undelivered message count.
    #[must_use]
    pub fn strong_len(&self) -> usize {
        self.queue.lock().strong_len()
    }

    /// Replayable holder count.
    #[must_use]
    pub fn soft_len(&self) -> usize {
        self.queue.lock().soft_len()
    }

    /// True when both queues are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Write one text frame per message. Returns how many were written; a
    /// failed write breaks the attachment, so a shortfall means detach.
    fn write_frames(&self, sink: &FrameSink, messages: &[Arc<QueuedMessage>]) -> u64 {
        let mut sent = 0;
        for message in messages {
            let json = match serde_json::to_string(message.envelope()) {
                Ok(json) => json,
                Err(e) => {
                    warn!(user = %self.user, guid = %self.guid, error = %e,
                          coord = %message.coord(), "failed to serialize envelope");
                    sent += 1; // not a transport fault; skip the message
                    continue;
                }
            };
            if let Err(e) = sink.send(Frame::Text(Arc::new(json))) {
                counter!(WRITE_FAILURES_TOTAL).increment(1);
                warn!(user = %self.user, guid = %self.guid, error = %e,
                      coord = %message.coord(), "frame write failed, detaching");
                break;
            }
            sent += 1;
        }
        sent
    }

    /// Serialize the messages as one JSON array and consume the batch sink.
    /// Returns whether the response went out.
    fn write_batch(&self, sink: BatchSink, messages: &[Arc<QueuedMessage>]) -> bool {
        let envelopes: Vec<&Envelope> = messages.iter().map(|m| m.envelope()).collect();
        let body = match serde_json::to_string(&envelopes) {
            Ok(body) => body,
            Err(e) => {
                warn!(user = %self.user, guid = %self.guid, error = %e,
                      "failed to serialize batch, sending empty array");
                EMPTY_BATCH_BODY.to_owned()
            }
        };
        match sink.send(body) {
            Ok(()) => true,
            Err(e) => {
                counter!(WRITE_FAILURES_TOTAL).increment(1);
                warn!(user = %self.user, guid = %self.guid, error = %e, "batch response failed");
                false
            }
        }
    }

    fn lock_timed_out(&self, lock: LockKind, operation: &'static str) {
        counter!(LOCK_TIMEOUTS_TOTAL, "lock" => lock.as_str()).increment(1);
        warn!(user = %self.user, guid = %self.guid, lock = %lock, operation,
              timeout_ms = self.lock_timeout.as_millis() as u64, "lock wait timed out, skipping");
    }

    fn detached_inactive(&self, kind: TransportKind) {
        debug!(user = %self.user, guid = %self.guid, ?kind,
               "channel inactive, detaching");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("guid", &self.guid)
            .field("deadline_ms", &self.deadline_ms.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

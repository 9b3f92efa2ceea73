//! Dual retention queue: strong FIFO for primary delivery, soft FIFO for
//! best-effort replay.
//!
//! Both queues hold the same messages in enqueue order. The strong queue
//! keeps a message until it is drained for delivery, skipped by a client
//! acknowledgement, or its strong deadline passes. The soft queue shares the
//! same `Arc` handles but is additionally size-capped: when the cap is
//! exceeded the oldest holders are evicted, so replay coverage shrinks under
//! pressure independently of deadlines. Removing a message from the strong
//! queue never removes its soft holder.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::coord::Coord;
use crate::envelope::QueuedMessage;

/// The two ordered views over one session's outbound stream.
#[derive(Debug)]
pub struct DualQueue {
    strong: VecDeque<Arc<QueuedMessage>>,
    soft: VecDeque<Arc<QueuedMessage>>,
    soft_capacity: usize,
}

impl DualQueue {
    /// Create an empty queue pair with the given soft-holder cap.
    #[must_use]
    pub fn new(soft_capacity: usize) -> Self {
        Self {
            strong: VecDeque::new(),
            soft: VecDeque::new(),
            soft_capacity,
        }
    }

    /// Append a message to both queues, evicting the oldest soft holders if
    /// the cap is exceeded.
    pub fn enqueue(&mut self, message: Arc<QueuedMessage>) {
        self.strong.push_back(Arc::clone(&message));
        self.soft.push_back(message);
        while self.soft.len() > self.soft_capacity {
            let _ = self.soft.pop_front();
        }
    }

    /// Drop strong messages past their strong deadline and soft holders past
    /// their soft deadline. Returns `(strong_dropped, soft_dropped)`.
    pub fn expire(&mut self, now_ms: i64) -> (usize, usize) {
        let strong_before = self.strong.len();
        let soft_before = self.soft.len();
        self.strong.retain(|m| m.strong_deadline_ms() >= now_ms);
        self.soft.retain(|m| m.soft_deadline_ms() >= now_ms);
        (
            strong_before - self.strong.len(),
            soft_before - self.soft.len(),
        )
    }

    /// Drop everything at or before `coord` from both queues. This is the
    /// client-acknowledgement path.
    pub fn skip_up_to(&mut self, coord: Coord) {
        self.strong.retain(|m| m.coord() > coord);
        self.soft.retain(|m| m.coord() > coord);
    }

    /// Remove and return all strong messages in FIFO order.
    pub fn drain_strong(&mut self) -> Vec<Arc<QueuedMessage>> {
        self.strong.drain(..).collect()
    }

    /// Messages eligible for replay: the soft prefix strictly before the
    /// head of the strong queue.
    ///
    /// Replay retransmits messages a previous transport already received but
    /// the client may have missed; it stops at the first strongly retained
    /// message because a following flush delivers those primarily, and
    /// replay must not duplicate them. Mutates neither queue.
    #[must_use]
    pub fn replay_soft_before_strong_head(&self) -> Vec<Arc<QueuedMessage>> {
        let head = self.strong.front();
        let mut out = Vec::new();
        for holder in &self.soft {
            if let Some(head) = head {
                if Arc::ptr_eq(holder, head) {
                    break;
                }
            }
            out.push(Arc::clone(holder));
        }
        out
    }

    /// First undelivered coordinate, if any.
    #[must_use]
    pub fn strong_head_coord(&self) -> Option<Coord> {
        self.strong.front().map(|m| m.coord())
    }

    /// Number of undelivered messages.
    #[must_use]
    pub fn strong_len(&self) -> usize {
        self.strong.len()
    }

    /// Number of replayable holders.
    #[must_use]
    pub fn soft_len(&self) -> usize {
        self.soft.len()
    }

    /// True when both queues are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strong.is_empty() && self.soft.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn msg(timestamp_ms: i64, sequence: u32) -> Arc<QueuedMessage> {
        msg_with_lifetimes(timestamp_ms, sequence, 1_000, 10_000)
    }

    fn msg_with_lifetimes(
        timestamp_ms: i64,
        sequence: u32,
        strong_ms: u64,
        soft_ms: u64,
    ) -> Arc<QueuedMessage> {
        Arc::new(QueuedMessage::new(
            json!({"seq": sequence}),
            Coord::new(timestamp_ms, sequence),
            Duration::from_millis(strong_ms),
            Duration::from_millis(soft_ms),
        ))
    }

    #[test]
    fn enqueue_appends_to_both() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        q.enqueue(msg(1_000, 1));
        assert_eq!(q.strong_len(), 2);
        assert_eq!(q.soft_len(), 2);
    }

    #[test]
    fn enqueue_order_is_preserved() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        q.enqueue(msg(1_000, 1));
        q.enqueue(msg(1_001, 0));
        let drained = q.drain_strong();
        let coords: Vec<Coord> = drained.iter().map(|m| m.coord()).collect();
        assert_eq!(
            coords,
            vec![
                Coord::new(1_000, 0),
                Coord::new(1_000, 1),
                Coord::new(1_001, 0)
            ]
        );
    }

    #[test]
    fn strong_contents_strictly_increase() {
        let mut q = DualQueue::new(16);
        for (t, s) in [(1_000, 0), (1_000, 1), (1_000, 2), (1_001, 0), (1_002, 0)] {
            q.enqueue(msg(t, s));
        }
        let drained = q.drain_strong();
        for pair in drained.windows(2) {
            assert!(pair[0].coord() < pair[1].coord());
        }
    }

    #[test]
    fn soft_cap_evicts_oldest() {
        let mut q = DualQueue::new(2);
        q.enqueue(msg(1_000, 0));
        q.enqueue(msg(1_000, 1));
        q.enqueue(msg(1_000, 2));
        // Oldest soft holder evicted, strong untouched.
        assert_eq!(q.strong_len(), 3);
        assert_eq!(q.soft_len(), 2);
        let replay = q.replay_soft_before_strong_head();
        // Strong head (1000,0) is gone from soft, so nothing equals it; the
        // surviving holders are all replayable.
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].coord(), Coord::new(1_000, 1));
    }

    #[test]
    fn expire_drops_by_independent_deadlines() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg_with_lifetimes(1_000, 0, 10, 500));
        q.enqueue(msg_with_lifetimes(1_000, 1, 1_000, 1_000));
        let (strong_dropped, soft_dropped) = q.expire(1_100);
        assert_eq!(strong_dropped, 1);
        assert_eq!(soft_dropped, 0);
        assert_eq!(q.strong_len(), 1);
        assert_eq!(q.soft_len(), 2);

        let (strong_dropped, soft_dropped) = q.expire(1_600);
        assert_eq!(strong_dropped, 0);
        assert_eq!(soft_dropped, 1);
    }

    #[test]
    fn expire_is_idempotent() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg_with_lifetimes(1_000, 0, 10, 20));
        let _ = q.expire(2_000);
        let before = (q.strong_len(), q.soft_len());
        let _ = q.expire(2_000);
        assert_eq!((q.strong_len(), q.soft_len()), before);
    }

    #[test]
    fn skip_drops_both_queues_consistently() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        q.enqueue(msg(1_000, 1));
        q.enqueue(msg(1_001, 0));
        q.skip_up_to(Coord::new(1_000, 1));
        assert_eq!(q.strong_len(), 1);
        assert_eq!(q.soft_len(), 1);
        assert_eq!(q.strong_head_coord(), Some(Coord::new(1_001, 0)));
    }

    #[test]
    fn skip_is_idempotent() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        q.enqueue(msg(1_001, 0));
        q.skip_up_to(Coord::new(1_000, 0));
        let before = (q.strong_len(), q.soft_len());
        q.skip_up_to(Coord::new(1_000, 0));
        assert_eq!((q.strong_len(), q.soft_len()), before);
    }

    #[test]
    fn skip_everything_empties_both() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        q.skip_up_to(Coord::new(1_000, 0));
        assert!(q.is_empty());
    }

    #[test]
    fn replay_stops_at_strong_head() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        q.enqueue(msg(1_000, 1));
        q.enqueue(msg(1_001, 0));
        // Deliver the first two, leaving (1001,0) at the strong head.
        let _ = q.strong.pop_front();
        let _ = q.strong.pop_front();
        let replay = q.replay_soft_before_strong_head();
        let coords: Vec<Coord> = replay.iter().map(|m| m.coord()).collect();
        assert_eq!(coords, vec![Coord::new(1_000, 0), Coord::new(1_000, 1)]);
    }

    #[test]
    fn replay_with_empty_strong_yields_whole_soft_tail() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        q.enqueue(msg(1_000, 1));
        let _ = q.drain_strong();
        let replay = q.replay_soft_before_strong_head();
        assert_eq!(replay.len(), 2);
    }

    #[test]
    fn replay_with_full_strong_is_empty() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        q.enqueue(msg(1_000, 1));
        // Nothing delivered yet: soft head == strong head, nothing to replay.
        assert!(q.replay_soft_before_strong_head().is_empty());
    }

    #[test]
    fn replay_does_not_mutate() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg(1_000, 0));
        let _ = q.drain_strong();
        let _ = q.replay_soft_before_strong_head();
        let _ = q.replay_soft_before_strong_head();
        assert_eq!(q.soft_len(), 1);
    }

    #[test]
    fn soft_survives_strong_removal_but_not_reverse() {
        let mut q = DualQueue::new(16);
        q.enqueue(msg_with_lifetimes(1_000, 0, 10, 10_000));
        let _ = q.expire(2_000);
        // Gone from strong, still replayable from soft.
        assert_eq!(q.strong_len(), 0);
        assert_eq!(q.soft_len(), 1);
    }

    #[test]
    fn empty_queue_behaves() {
        let mut q = DualQueue::new(16);
        assert!(q.is_empty());
        assert!(q.drain_strong().is_empty());
        assert!(q.replay_soft_before_strong_head().is_empty());
        assert_eq!(q.expire(5_000), (0, 0));
        q.skip_up_to(Coord::new(1_000, 0));
        assert!(q.is_empty());
    }
}

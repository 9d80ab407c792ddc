// SPDX-License-Identifier: MPL-2.0

//! One-shot timer service owned by the session actor.
//!
//! Every live timer is keyed by `(kind, packet_id)` through an opaque
//! [`TimerToken`] stored in session state. Cancellation removes the deadline
//! before it can fire and is a no-op for a timer that already fired, which is
//! what lets state-transition handlers cancel unconditionally.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

/// What a timer expiry means to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Retransmit an unacked QoS 1/2 delivery.
    AckRetry,
    /// Give up waiting for PUBREL on an inbound QoS 2 message.
    RelTimeout,
    /// Give up waiting for PUBCOMP on an outbound QoS 2 message.
    CompTimeout,
    /// Persistent session TTL elapsed.
    SessionExpiry,
    /// Periodic stats publication.
    Collect,
}

/// Handle to a live timer; cancelling a fired timer is a no-op.
#[derive(Debug)]
pub struct TimerToken {
    seq: u64,
}

/// Deadline-ordered timer queue with O(log n) arm/cancel.
///
/// The actor awaits [`SessionTimers::next_expired`] as one branch of its
/// event loop select; the future parks forever while no timer is armed.
#[derive(Debug, Default)]
pub struct SessionTimers {
    queue: BTreeMap<(Instant, u64), (TimerKind, u16)>,
    index: HashMap<u64, Instant>,
    next_seq: u64,
}

impl SessionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer firing `after` from now.
    pub fn arm(&mut self, kind: TimerKind, packet_id: u16, after: Duration) -> TimerToken {
        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline = Instant::now() + after;
        self.queue.insert((deadline, seq), (kind, packet_id));
        self.index.insert(seq, deadline);
        TimerToken { seq }
    }

    /// Cancel a timer. Idempotent: a token whose timer already fired (or was
    /// cleared) is silently ignored.
    pub fn cancel(&mut self, token: TimerToken) {
        if let Some(deadline) = self.index.remove(&token.seq) {
            self.queue.remove(&(deadline, token.seq));
        }
    }

    /// Drop every armed timer.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Wait for the earliest deadline and pop it.
    ///
    /// Pending forever while the queue is empty; cancellation-safe, so it can
    /// sit in a `select!` that is recreated every loop iteration.
    pub async fn next_expired(&mut self) -> (TimerKind, u16) {
        let (deadline, seq) = match self.queue.keys().next() {
            Some(&(deadline, seq)) => (deadline, seq),
            None => return std::future::pending().await,
        };

        tokio::time::sleep_until(deadline).await;

        self.index.remove(&seq);
        self.queue
            .remove(&(deadline, seq))
            .expect("armed timer disappeared without cancel")
    }
}

// SPDX-License-Identifier: MPL-2.0

//! Bounded FIFO buffer for messages the session cannot deliver right now
//! (client offline or inflight window saturated).
//!
//! `enqueue` never blocks: when the queue is at capacity a message is shed
//! according to the [`DropPolicy`] and the cumulative drop counter advances.

use std::collections::VecDeque;

use crate::message::Message;

/// What to shed when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest queued message to make room for the new one.
    DropOldest,
    /// Reject the incoming message, keeping the queue as-is.
    DropNewest,
}

/// Bounded FIFO message queue with a drop policy.
#[derive(Debug)]
pub struct MessageQueue {
    queue: VecDeque<Message>,
    /// Maximum queued messages; 0 means unbounded.
    capacity: usize,
    policy: DropPolicy,
    /// Cumulative count of messages shed since creation.
    dropped: u64,
}

impl MessageQueue {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            policy,
            dropped: 0,
        }
    }

    /// Queue a message, shedding per policy when full.
    ///
    /// Returns the message that was dropped, if any.
    pub fn enqueue(&mut self, msg: Message) -> Option<Message> {
        if self.capacity > 0 && self.queue.len() >= self.capacity {
            self.dropped += 1;
            match self.policy {
                DropPolicy::DropOldest => {
                    let evicted = self.queue.pop_front();
                    self.queue.push_back(msg);
                    return evicted;
                }
                DropPolicy::DropNewest => return Some(msg),
            }
        }

        self.queue.push_back(msg);
        None
    }

    /// Pop the oldest queued message.
    pub fn dequeue(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Cumulative number of messages shed since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

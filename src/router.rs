// SPDX-License-Identifier: MPL-2.0

//! Router and retained-store contracts, plus an in-process fabric.
//!
//! Topic-tree matching and global dispatch live outside the session core;
//! the session only depends on these traits. [`LocalRouter`] is a small
//! in-process implementation used by the integration tests and demo wiring.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::message::{Message, QoS};
use crate::session::SessionDispatcher;

/// Publish/subscribe fabric the session talks to.
#[async_trait]
pub trait Router: Send + Sync {
    /// Publish a message to every matching subscriber.
    async fn publish(&self, msg: Message);

    /// Register subscriptions for a client; returns the granted QoS per
    /// filter, parallel to `topics`.
    async fn subscribe(&self, client_id: &str, topics: &[(String, QoS)]) -> Vec<QoS>;

    /// Remove subscriptions for a client.
    async fn unsubscribe(&self, client_id: &str, filters: &[String]);
}

/// Store of retained messages, queried when a new filter is added.
#[async_trait]
pub trait RetainedStore: Send + Sync {
    /// Retained messages whose topic matches `filter`.
    async fn matching(&self, filter: &str) -> Vec<Message>;
}

/// Retained store that never holds anything.
pub struct NoRetained;

#[async_trait]
impl RetainedStore for NoRetained {
    async fn matching(&self, _filter: &str) -> Vec<Message> {
        Vec::new()
    }
}

/// MQTT topic filter match (`+` single level, `#` multi level).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug)]
struct RouterEntry {
    dispatcher: SessionDispatcher,
    subscriptions: Vec<(String, QoS)>,
}

/// In-process router: exact-grant subscriptions, fan-out on publish.
///
/// Messages are forwarded at `min(publish QoS, best matching granted QoS)`,
/// once per subscriber regardless of how many filters match.
#[derive(Debug, Default)]
pub struct LocalRouter {
    entries: DashMap<String, RouterEntry>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session's dispatcher so publishes can reach it.
    pub fn register(&self, client_id: impl Into<String>, dispatcher: SessionDispatcher) {
        self.entries.insert(
            client_id.into(),
            RouterEntry {
                dispatcher,
                subscriptions: Vec::new(),
            },
        );
    }

    pub fn unregister(&self, client_id: &str) {
        self.entries.remove(client_id);
    }
}

#[async_trait]
impl Router for LocalRouter {
    async fn publish(&self, msg: Message) {
        let mut targets = Vec::new();
        for entry in self.entries.iter() {
            let best = entry
                .subscriptions
                .iter()
                .filter(|(filter, _)| topic_matches(filter, &msg.topic))
                .map(|(_, qos)| *qos)
                .max();
            if let Some(granted) = best {
                targets.push((entry.dispatcher.clone(), granted.min(msg.qos)));
            }
        }

        for (dispatcher, qos) in targets {
            let mut forwarded = msg.clone();
            forwarded.qos = qos;
            forwarded.dup = false;
            forwarded.retain = false;
            forwarded.packet_id = None;
            if dispatcher.dispatch(forwarded).await.is_err() {
                tracing::debug!("dropping publish for a terminated session");
            }
        }
    }

    async fn subscribe(&self, client_id: &str, topics: &[(String, QoS)]) -> Vec<QoS> {
        if let Some(mut entry) = self.entries.get_mut(client_id) {
            for (filter, qos) in topics {
                match entry
                    .subscriptions
                    .iter()
                    .position(|(existing, _)| existing == filter)
                {
                    Some(idx) => entry.subscriptions[idx].1 = *qos,
                    None => entry.subscriptions.push((filter.clone(), *qos)),
                }
            }
        }
        topics.iter().map(|(_, qos)| *qos).collect()
    }

    async fn unsubscribe(&self, client_id: &str, filters: &[String]) {
        if let Some(mut entry) = self.entries.get_mut(client_id) {
            entry
                .subscriptions
                .retain(|(filter, _)| !filters.contains(filter));
        }
    }
}

/// Concurrent retained-message store keyed by topic.
#[derive(Debug, Default)]
pub struct InMemoryRetained {
    messages: DashMap<String, Message>,
}

impl InMemoryRetained {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the retained message for a topic. An empty payload
    /// clears the slot, per MQTT retained semantics.
    pub fn retain(&self, msg: Message) {
        if msg.payload.is_empty() {
            self.messages.remove(&msg.topic);
        } else {
            self.messages.insert(msg.topic.clone(), msg);
        }
    }
}

#[async_trait]
impl RetainedStore for InMemoryRetained {
    async fn matching(&self, filter: &str) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|entry| topic_matches(filter, entry.key()))
            .map(|entry| entry.value().clone().with_retain(true))
            .collect()
    }
}

// SPDX-License-Identifier: MPL-2.0

//! Session manager contract and stats snapshots.
//!
//! Sessions push a [`SessionInfo`] snapshot on start and on every collect
//! tick; the registry is the broker's observability surface for per-client
//! state.

use dashmap::DashMap;

/// Point-in-time snapshot of one session's state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionInfo {
    pub client_id: String,
    pub clean_sess: bool,
    /// Number of active subscriptions.
    pub subscriptions: usize,
    pub max_inflight: usize,
    pub inflight_queue_len: usize,
    pub message_queue_len: usize,
    /// Cumulative messages shed by the pending queue.
    pub message_dropped: u64,
    pub awaiting_rel: usize,
    pub awaiting_ack: usize,
    pub awaiting_comp: usize,
    /// Unix timestamp (seconds) of session creation.
    pub created_at: u64,
}

/// Registry the broker uses to track live sessions.
///
/// Implementations are shared across sessions and must be internally
/// synchronized.
pub trait SessionRegistry: Send + Sync {
    /// Insert or refresh the snapshot for a session.
    fn register_session(&self, info: SessionInfo);
    /// Remove a session on teardown.
    fn unregister_session(&self, client_id: &str);
}

/// Concurrent in-memory registry.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    sessions: DashMap<String, SessionInfo>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot for a client, if registered.
    pub fn snapshot(&self, client_id: &str) -> Option<SessionInfo> {
        self.sessions.get(client_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionRegistry for InMemoryRegistry {
    fn register_session(&self, info: SessionInfo) {
        self.sessions.insert(info.client_id.clone(), info);
    }

    fn unregister_session(&self, client_id: &str) {
        self.sessions.remove(client_id);
    }
}

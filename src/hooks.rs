// SPDX-License-Identifier: MPL-2.0

//! Observer/interceptor seams around session operations.
//!
//! Transforming hooks may filter or rewrite their input; notification hooks
//! are fire-and-forget. The default implementation of every method is
//! identity/no-op, so implementors override only what they care about.

use async_trait::async_trait;

use crate::message::{Message, QoS};
use crate::session::StopReason;

#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Runs before a subscribe is processed; may filter or rewrite the
    /// requested topics.
    async fn on_subscribe(&self, client_id: &str, topics: Vec<(String, QoS)>) -> Vec<(String, QoS)> {
        let _ = client_id;
        topics
    }

    /// Runs after a subscribe has been merged into the session.
    async fn on_subscribed(&self, client_id: &str, granted: &[(String, QoS)]) {
        let _ = (client_id, granted);
    }

    /// Runs before an unsubscribe is processed; may filter the filters.
    async fn on_unsubscribe(&self, client_id: &str, filters: Vec<String>) -> Vec<String> {
        let _ = client_id;
        filters
    }

    /// A QoS 1/2 delivery was acknowledged by the client.
    async fn on_message_acked(&self, client_id: &str, msg: &Message) {
        let _ = (client_id, msg);
    }

    /// The session actor is shutting down.
    async fn on_session_terminated(&self, client_id: &str, reason: StopReason) {
        let _ = (client_id, reason);
    }
}

/// Hook bus with every seam left at its default.
pub struct NoopHooks;

#[async_trait]
impl SessionHooks for NoopHooks {}

// SPDX-License-Identifier: MPL-2.0

//! Error and termination types for the session core.
//!
//! Malformed protocol events from the client (unknown packet ids, replays)
//! are never fatal: the session logs and ignores them. A session terminates
//! only for one of the [`StopReason`]s.

/// Errors surfaced to callers of the session API.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Inbound QoS 2 window is full; the publish was rejected.
    #[error("inbound QoS 2 publish dropped: awaiting-rel window full (capacity {capacity})")]
    Dropped { capacity: usize },

    /// A QoS 1/2 publish arrived without a packet identifier.
    #[error("QoS {qos} publish is missing a packet identifier")]
    MissingPacketId { qos: u8 },

    /// The session actor is gone; its mailbox no longer accepts commands.
    #[error("session mailbox closed")]
    MailboxClosed,

    /// The synchronous QoS 2 publish did not complete within the caller-side
    /// deadline. The session may still commit the message later.
    #[error("synchronous publish timed out after {timeout_ms} ms")]
    PublishDeadline { timeout_ms: u64 },
}

impl SessionError {
    /// Overload rejections are retryable by the publisher once the window
    /// drains; everything else indicates a dead or misused session.
    pub fn is_overload(&self) -> bool {
        matches!(self, SessionError::Dropped { .. })
    }
}

/// Why a session actor terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StopReason {
    /// Clean-session client disconnected; the session dies with it.
    Disconnected,
    /// Explicit destroy command (e.g. a clean-session reconnect under the
    /// same client id).
    Destroyed,
    /// `expired_after` elapsed with no reconnect.
    Expired,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Disconnected => write!(f, "client disconnected"),
            StopReason::Destroyed => write!(f, "destroyed"),
            StopReason::Expired => write!(f, "expired"),
        }
    }
}

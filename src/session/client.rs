// SPDX-License-Identifier: MPL-2.0

//! Handle to the client connection owning a session.
//!
//! The connection handler holds the receiving half; the session only ever
//! talks to the client through [`ClientPacket`]s. Liveness is the channel
//! itself: when the connection drops its receiver, [`ClientHandle::closed`]
//! resolves and the session sees a client-down.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::message::Message;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Why a connection is being told to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickoutReason {
    /// Another connection presented the same client id.
    DuplicateClientId,
}

/// Packets the session sends to its client connection.
#[derive(Debug)]
pub enum ClientPacket {
    /// Forward a PUBLISH to the client.
    Deliver(Message),
    /// Retransmit a PUBREL for a QoS 2 exchange interrupted by reconnect.
    RedeliverRel { packet_id: u16 },
    /// The session was taken over; this connection must close.
    Kickout {
        reason: KickoutReason,
        new_client: ClientHandle,
    },
}

/// Cheap, cloneable handle to one client connection.
///
/// Equality is by handle identity, not channel: two handles wrapping the
/// same connection compare equal, a reconnected client gets a fresh id.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: u64,
    tx: mpsc::Sender<ClientPacket>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<ClientPacket>) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Create a handle together with the connection-side receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClientPacket>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn handle_id(&self) -> u64 {
        self.id
    }

    /// Send a PUBLISH to the client, waiting for channel capacity.
    pub async fn deliver(&self, msg: Message) -> Result<(), ClientGone> {
        self.tx
            .send(ClientPacket::Deliver(msg))
            .await
            .map_err(|_| ClientGone)
    }

    /// Replay a PUBREL after session resumption.
    pub async fn redeliver_rel(&self, packet_id: u16) -> Result<(), ClientGone> {
        self.tx
            .send(ClientPacket::RedeliverRel { packet_id })
            .await
            .map_err(|_| ClientGone)
    }

    /// Tell a superseded connection to close. Best-effort: a stuck or dead
    /// connection must not stall the takeover.
    pub fn kickout(&self, reason: KickoutReason, new_client: ClientHandle) -> Result<(), ClientGone> {
        self.tx
            .try_send(ClientPacket::Kickout { reason, new_client })
            .map_err(|_| ClientGone)
    }

    /// Resolves once the connection side has dropped its receiver.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// True once the connection side has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

/// The connection-side receiver is gone.
#[derive(Debug, thiserror::Error)]
#[error("client connection gone")]
pub struct ClientGone;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::QoS;

    #[tokio::test]
    async fn test_deliver_reaches_receiver() {
        let (handle, mut rx) = ClientHandle::channel(4);
        handle
            .deliver(Message::new("a/b", b"x".as_ref(), QoS::AtMostOnce))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            ClientPacket::Deliver(msg) => assert_eq!(msg.topic, "a/b"),
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_fires_on_receiver_drop() {
        let (handle, rx) = ClientHandle::channel(1);
        drop(rx);
        // Must resolve promptly rather than hang.
        tokio::time::timeout(std::time::Duration::from_millis(100), handle.closed())
            .await
            .unwrap();
        assert!(handle
            .deliver(Message::new("a", b"".as_ref(), QoS::AtMostOnce))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_handle_identity() {
        let (a, _rx_a) = ClientHandle::channel(1);
        let (b, _rx_b) = ClientHandle::channel(1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}

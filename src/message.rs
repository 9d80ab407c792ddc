// SPDX-License-Identifier: MPL-2.0

//! Application-level message types shared between the session core and its
//! collaborators (router, retained store, client connection).
//!
//! The wire codec lives outside this crate; a [`Message`] is the decoded,
//! owned form of a PUBLISH that the router dispatches and the session
//! delivers.

use bytes::Bytes;

/// MQTT quality-of-service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum QoS {
    /// At most once (fire and forget).
    AtMostOnce = 0,
    /// At least once (PUBACK exchange).
    AtLeastOnce = 1,
    /// Exactly once (PUBREC/PUBREL/PUBCOMP exchange).
    ExactlyOnce = 2,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(other),
        }
    }
}

/// A routed application message.
///
/// `packet_id` is meaningful only between one sender and one receiver: the
/// session assigns its own id when delivering to its client, regardless of
/// the id the publisher used on its side of the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was published to.
    pub topic: String,
    /// Application payload.
    pub payload: Bytes,
    /// Effective delivery QoS.
    pub qos: QoS,
    /// Retain flag as seen by the receiver.
    pub retain: bool,
    /// Set on retransmissions of the same packet id.
    pub dup: bool,
    /// Packet identifier; `None` until assigned by the delivering side.
    pub packet_id: Option<u16>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
            packet_id: None,
        }
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn with_packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    pub fn with_dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_round_trip() {
        for raw in 0u8..=2 {
            let qos = QoS::try_from(raw).unwrap();
            assert_eq!(qos.as_u8(), raw);
        }
        assert_eq!(QoS::try_from(3), Err(3));
    }

    #[test]
    fn test_qos_ordering() {
        assert!(QoS::AtMostOnce < QoS::AtLeastOnce);
        assert!(QoS::AtLeastOnce < QoS::ExactlyOnce);
    }

    #[test]
    fn test_message_builders() {
        let msg = Message::new("sensors/temp", b"23.5".as_ref(), QoS::AtLeastOnce)
            .with_retain(true)
            .with_packet_id(7);

        assert_eq!(msg.topic, "sensors/temp");
        assert_eq!(msg.payload.as_ref(), b"23.5");
        assert!(msg.retain);
        assert!(!msg.dup);
        assert_eq!(msg.packet_id, Some(7));
    }
}

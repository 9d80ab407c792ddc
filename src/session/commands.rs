// SPDX-License-Identifier: MPL-2.0

//! Commands accepted by the session actor and the internal event ladder.
//!
//! Every public session operation is a [`SessionCommand`] posted to the
//! actor's mailbox. The mailbox is prioritized: administrative events
//! preempt acknowledgements, acks drain ahead of fresh deliveries, and the
//! synchronous inbound publish yields to everything else.

use tokio::sync::oneshot;

use crate::message::{Message, QoS};
use crate::session::client::ClientHandle;
use crate::session::error::SessionError;
use crate::session::timers::TimerKind;

/// Commands posted by the connection handler, the router, and the runtime.
#[derive(Debug)]
pub enum SessionCommand {
    /// Router delivering a matched message for this client.
    Dispatch(Message),
    /// Synchronous inbound QoS 2 publish; the caller blocks on `reply`.
    PublishInbound {
        msg: Message,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// QoS 1 completion from the client.
    PubAck { packet_id: u16 },
    /// QoS 2 phase 1 from the client.
    PubRec { packet_id: u16 },
    /// QoS 2 phase 2 from the client (for a publish we received).
    PubRel { packet_id: u16 },
    /// QoS 2 final from the client.
    PubComp { packet_id: u16 },
    /// Subscribe; granted QoS is reported through `ack`.
    Subscribe {
        topics: Vec<(String, QoS)>,
        ack: oneshot::Sender<Vec<QoS>>,
    },
    /// Unsubscribe; unknown filters are ignored.
    Unsubscribe { filters: Vec<String> },
    /// Hand the session to a newly connected client.
    Resume { client: ClientHandle },
    /// Publish a stats snapshot now.
    CollectInfo,
    /// Terminate the session.
    Destroy,
}

/// Everything the actor's event loop can be woken by.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Command(SessionCommand),
    /// A per-packet timer expired.
    Timeout { kind: TimerKind, packet_id: u16 },
    /// The liveness watch on the owning client fired.
    ClientDown { handle_id: u64 },
    /// The persistent-session TTL elapsed.
    Expired,
    /// Periodic stats tick.
    Collect,
}

impl SessionCommand {
    fn priority(&self) -> u8 {
        match self {
            SessionCommand::Destroy => 10,
            SessionCommand::Resume { .. } => 9,
            SessionCommand::PubRel { .. }
            | SessionCommand::PubComp { .. }
            | SessionCommand::PubRec { .. } => 8,
            SessionCommand::PubAck { .. } => 7,
            SessionCommand::Unsubscribe { .. } => 6,
            SessionCommand::Subscribe { .. } => 5,
            SessionCommand::CollectInfo => 2,
            SessionCommand::Dispatch(_) => 1,
            SessionCommand::PublishInbound { .. } => 0,
        }
    }
}

impl SessionEvent {
    /// Mailbox band for this event; higher wins.
    pub(crate) fn priority(&self) -> u8 {
        match self {
            SessionEvent::ClientDown { .. } | SessionEvent::Expired => 10,
            SessionEvent::Timeout { .. } => 5,
            SessionEvent::Collect => 2,
            SessionEvent::Command(cmd) => cmd.priority(),
        }
    }
}

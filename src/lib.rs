// SPDX-License-Identifier: MPL-2.0

//! Per-client session core for an MQTT 3.1.1 broker.
//!
//! Each connected (or recently disconnected, persistent) client is backed by
//! one session actor that owns its subscriptions, inflight window, pending
//! queue, and QoS 1/2 acknowledgement state. The actor mediates between the
//! broker's router and the client connection handler:
//!
//! ```text
//! Router --Dispatch--> Session --Deliver/Redeliver/Kickout--> Client
//! Client --acks/subscribe/publish--> Session --publish/subscribe--> Router
//! ```
//!
//! # Architecture
//!
//! - [`session::MqttSession`] spawns and addresses the actor; every
//!   operation is a message into its prioritized mailbox. The inbound QoS 2
//!   publish is the only synchronous call, so the exchange is tracked before
//!   the publisher proceeds.
//! - [`router::Router`], [`router::RetainedStore`], [`hooks::SessionHooks`]
//!   and [`registry::SessionRegistry`] are the seams to the rest of the
//!   broker; in-process implementations are included for tests and demos.
//! - Timers (retransmit, QoS 2 give-up, session expiry, stats collection)
//!   are one-shot handles owned by session state and cancelled on the state
//!   transition that invalidates them.

pub mod hooks;
pub mod message;
pub mod registry;
pub mod router;
pub mod session;

pub use message::{Message, QoS};
pub use registry::{InMemoryRegistry, SessionInfo, SessionRegistry};
pub use router::{LocalRouter, RetainedStore, Router};
pub use session::{
    ClientHandle, ClientPacket, DropPolicy, KickoutReason, MqttSession, SessionConfig,
    SessionDeps, SessionError, StopReason,
};

// SPDX-License-Identifier: MPL-2.0

//! Per-client session core.
//!
//! One session actor per persistent client identity, tracking subscriptions
//! and QoS 1/2 exchanges across disconnects and resumption.

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod handle;
pub mod mailbox;
pub mod mqueue;
pub mod packet_id;
pub mod timers;
mod worker;

pub use client::{ClientHandle, ClientPacket, KickoutReason};
pub use commands::SessionCommand;
pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::{SessionError, StopReason};
pub use handle::{MqttSession, SessionDeps, SessionDispatcher};
pub use mqueue::DropPolicy;

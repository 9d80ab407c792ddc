// SPDX-License-Identifier: MPL-2.0

//! Public handle to a session actor.
//!
//! [`MqttSession::start`] spawns the actor and returns a cheap, cloneable
//! handle. Every method posts a command to the actor's mailbox; only the
//! QoS 2 [`MqttSession::publish`] waits for the session's reply, bounded by
//! the configured deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::hooks::SessionHooks;
use crate::message::{Message, QoS};
use crate::registry::SessionRegistry;
use crate::router::{RetainedStore, Router};
use crate::session::client::ClientHandle;
use crate::session::commands::SessionCommand;
use crate::session::config::SessionConfig;
use crate::session::error::SessionError;
use crate::session::worker::SessionWorker;

/// Shared collaborators a session is wired to at start.
#[derive(Clone)]
pub struct SessionDeps {
    pub router: Arc<dyn Router>,
    pub retained: Arc<dyn RetainedStore>,
    pub hooks: Arc<dyn SessionHooks>,
    pub registry: Arc<dyn SessionRegistry>,
}

impl SessionDeps {
    pub fn new(
        router: Arc<dyn Router>,
        retained: Arc<dyn RetainedStore>,
        hooks: Arc<dyn SessionHooks>,
        registry: Arc<dyn SessionRegistry>,
    ) -> Self {
        Self {
            router,
            retained,
            hooks,
            registry,
        }
    }
}

/// Handle to one client's session actor.
#[derive(Clone)]
pub struct MqttSession {
    client_id: String,
    command_tx: mpsc::Sender<SessionCommand>,
    router: Arc<dyn Router>,
    publish_deadline: Duration,
}

impl MqttSession {
    /// Spawn a session actor for `client_id` owned by `client`.
    pub fn start(
        config: SessionConfig,
        clean_session: bool,
        client_id: impl Into<String>,
        client: ClientHandle,
        deps: SessionDeps,
    ) -> Self {
        let client_id = client_id.into();
        let (command_tx, command_rx) = mpsc::channel(config.command_queue_size.max(1));
        let publish_deadline = config.publish_deadline();
        let router = deps.router.clone();

        let worker = SessionWorker::new(
            config,
            clean_session,
            client_id.clone(),
            client,
            command_rx,
            deps,
        );
        tokio::spawn(worker.run());

        Self {
            client_id,
            command_tx,
            router,
            publish_deadline,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Sender the router keeps to dispatch matched messages to this session.
    pub fn dispatcher(&self) -> SessionDispatcher {
        SessionDispatcher {
            tx: self.command_tx.clone(),
        }
    }

    /// Publish a message from this client.
    ///
    /// QoS 0/1 go straight to the router; the session is not on that path.
    /// QoS 2 is a synchronous call into the session so the exchange is
    /// tracked before the publisher may proceed, bounded by the configured
    /// deadline.
    pub async fn publish(&self, msg: Message) -> Result<(), SessionError> {
        if msg.qos != QoS::ExactlyOnce {
            self.router.publish(msg).await;
            return Ok(());
        }

        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::PublishInbound { msg, reply }).await?;
        match tokio::time::timeout(self.publish_deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::MailboxClosed),
            Err(_) => Err(SessionError::PublishDeadline {
                timeout_ms: self.publish_deadline.as_millis() as u64,
            }),
        }
    }

    /// Subscribe; resolves with the granted QoS per filter.
    pub async fn subscribe(&self, topics: Vec<(String, QoS)>) -> Result<Vec<QoS>, SessionError> {
        let (ack, rx) = oneshot::channel();
        self.send(SessionCommand::Subscribe { topics, ack }).await?;
        rx.await.map_err(|_| SessionError::MailboxClosed)
    }

    pub async fn unsubscribe(&self, filters: Vec<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::Unsubscribe { filters }).await
    }

    pub async fn puback(&self, packet_id: u16) -> Result<(), SessionError> {
        self.send(SessionCommand::PubAck { packet_id }).await
    }

    pub async fn pubrec(&self, packet_id: u16) -> Result<(), SessionError> {
        self.send(SessionCommand::PubRec { packet_id }).await
    }

    pub async fn pubrel(&self, packet_id: u16) -> Result<(), SessionError> {
        self.send(SessionCommand::PubRel { packet_id }).await
    }

    pub async fn pubcomp(&self, packet_id: u16) -> Result<(), SessionError> {
        self.send(SessionCommand::PubComp { packet_id }).await
    }

    /// Hand the session to a newly connected client.
    pub async fn resume(&self, new_client: ClientHandle) -> Result<(), SessionError> {
        self.send(SessionCommand::Resume { client: new_client }).await
    }

    /// Terminate the session.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Destroy).await
    }

    /// Publish a stats snapshot to the registry now.
    pub async fn collect_info(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::CollectInfo).await
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::MailboxClosed)
    }
}

/// Router-facing sender for one session's mailbox.
#[derive(Debug, Clone)]
pub struct SessionDispatcher {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionDispatcher {
    /// Deliver a matched message into the session's pipeline.
    pub async fn dispatch(&self, msg: Message) -> Result<(), SessionError> {
        self.tx
            .send(SessionCommand::Dispatch(msg))
            .await
            .map_err(|_| SessionError::MailboxClosed)
    }
}

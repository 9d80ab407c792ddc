// SPDX-License-Identifier: MPL-2.0

//! The session actor: a single-writer event loop over a prioritized mailbox.
//!
//! All session state is owned by this task; callers communicate exclusively
//! through [`SessionCommand`]s. Each loop iteration stages every event that
//! is already waiting (commands, timer expiries, the client liveness watch)
//! into the priority mailbox, then handles the highest-priority one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::hooks::SessionHooks;
use crate::message::{Message, QoS};
use crate::registry::{SessionInfo, SessionRegistry};
use crate::router::{RetainedStore, Router};
use crate::session::client::{ClientHandle, KickoutReason};
use crate::session::commands::{SessionCommand, SessionEvent};
use crate::session::config::SessionConfig;
use crate::session::error::{SessionError, StopReason};
use crate::session::handle::SessionDeps;
use crate::session::mailbox::PriorityMailbox;
use crate::session::mqueue::MessageQueue;
use crate::session::packet_id::PacketIdAllocator;
use crate::session::timers::{SessionTimers, TimerKind, TimerToken};

pub(crate) struct SessionWorker {
    config: SessionConfig,
    clean_session: bool,
    client_id: String,
    /// Current owning connection; `None` while disconnected.
    client: Option<ClientHandle>,
    command_rx: mpsc::Receiver<SessionCommand>,
    mailbox: PriorityMailbox<SessionEvent>,
    /// Ordered, unique by filter.
    subscriptions: Vec<(String, QoS)>,
    /// QoS 1/2 deliveries not yet fully acknowledged, in insertion order.
    inflight: VecDeque<(u16, Message)>,
    mqueue: MessageQueue,
    /// Packet ids awaiting PUBACK (QoS 1) or PUBREC (QoS 2).
    awaiting_ack: HashMap<u16, TimerToken>,
    /// QoS 2 packet ids past PUBREC, awaiting PUBCOMP.
    awaiting_comp: HashMap<u16, TimerToken>,
    /// Inbound QoS 2 publishes awaiting PUBREL.
    awaiting_rel: HashMap<u16, (Message, TimerToken)>,
    expiry_timer: Option<TimerToken>,
    collect_timer: Option<TimerToken>,
    timers: SessionTimers,
    packet_ids: PacketIdAllocator,
    router: Arc<dyn Router>,
    retained: Arc<dyn RetainedStore>,
    hooks: Arc<dyn SessionHooks>,
    registry: Arc<dyn SessionRegistry>,
    created_at: u64,
    /// All command senders dropped; terminate once the mailbox drains.
    detached: bool,
}

impl SessionWorker {
    pub(crate) fn new(
        config: SessionConfig,
        clean_session: bool,
        client_id: String,
        client: ClientHandle,
        command_rx: mpsc::Receiver<SessionCommand>,
        deps: SessionDeps,
    ) -> Self {
        let mqueue = MessageQueue::new(config.mqueue_capacity, config.mqueue_policy);
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            config,
            clean_session,
            client_id,
            client: Some(client),
            command_rx,
            mailbox: PriorityMailbox::new(),
            subscriptions: Vec::new(),
            inflight: VecDeque::new(),
            mqueue,
            awaiting_ack: HashMap::new(),
            awaiting_comp: HashMap::new(),
            awaiting_rel: HashMap::new(),
            expiry_timer: None,
            collect_timer: None,
            timers: SessionTimers::new(),
            packet_ids: PacketIdAllocator::new(),
            router: deps.router,
            retained: deps.retained,
            hooks: deps.hooks,
            registry: deps.registry,
            created_at,
            detached: false,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            client_id = %self.client_id,
            clean_session = self.clean_session,
            "session started"
        );
        self.registry.register_session(self.info());
        if let Some(interval) = self.config.collect_interval() {
            self.collect_timer = Some(self.timers.arm(TimerKind::Collect, 0, interval));
        }

        let reason = self.event_loop().await;
        self.teardown(reason).await;
    }

    async fn event_loop(&mut self) -> StopReason {
        loop {
            // Stage every command already waiting so the priority ladder
            // applies across a burst of concurrent senders.
            loop {
                match self.command_rx.try_recv() {
                    Ok(cmd) => self.stage(SessionEvent::Command(cmd)),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.detached = true;
                        break;
                    }
                }
            }

            if let Some((_, event)) = self.mailbox.dequeue() {
                if let Some(reason) = self.handle_event(event).await {
                    return reason;
                }
                continue;
            }

            if self.detached {
                return StopReason::Destroyed;
            }

            let staged = tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => SessionEvent::Command(cmd),
                    None => {
                        self.detached = true;
                        continue;
                    }
                },
                expired = self.timers.next_expired() => {
                    let (kind, packet_id) = expired;
                    Self::timer_event(kind, packet_id)
                }
                handle_id = Self::client_closed(&self.client) => {
                    SessionEvent::ClientDown { handle_id }
                }
            };
            self.stage(staged);
        }
    }

    fn stage(&mut self, event: SessionEvent) {
        self.mailbox.enqueue(event.priority(), event);
    }

    fn timer_event(kind: TimerKind, packet_id: u16) -> SessionEvent {
        match kind {
            TimerKind::SessionExpiry => SessionEvent::Expired,
            TimerKind::Collect => SessionEvent::Collect,
            kind => SessionEvent::Timeout { kind, packet_id },
        }
    }

    /// Liveness watch on the owning connection. Parks forever while the
    /// session is detached from a client.
    async fn client_closed(client: &Option<ClientHandle>) -> u64 {
        match client {
            Some(client) => {
                client.closed().await;
                client.handle_id()
            }
            None => std::future::pending().await,
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) -> Option<StopReason> {
        match event {
            SessionEvent::Command(cmd) => self.handle_command(cmd).await,
            SessionEvent::Timeout { kind, packet_id } => {
                self.handle_timeout(kind, packet_id).await;
                None
            }
            SessionEvent::ClientDown { handle_id } => self.handle_client_down(handle_id),
            SessionEvent::Expired => self.handle_expired(),
            SessionEvent::Collect => {
                self.publish_info();
                if let Some(interval) = self.config.collect_interval() {
                    self.collect_timer = Some(self.timers.arm(TimerKind::Collect, 0, interval));
                }
                None
            }
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> Option<StopReason> {
        match cmd {
            SessionCommand::Dispatch(msg) => self.handle_dispatch(msg).await,
            SessionCommand::PublishInbound { msg, reply } => {
                let result = self.publish_inbound(msg).await;
                let _ = reply.send(result);
            }
            SessionCommand::PubAck { packet_id } => self.handle_puback(packet_id).await,
            SessionCommand::PubRec { packet_id } => self.handle_pubrec(packet_id).await,
            SessionCommand::PubRel { packet_id } => self.handle_pubrel(packet_id).await,
            SessionCommand::PubComp { packet_id } => self.handle_pubcomp(packet_id),
            SessionCommand::Subscribe { topics, ack } => self.handle_subscribe(topics, ack).await,
            SessionCommand::Unsubscribe { filters } => self.handle_unsubscribe(filters).await,
            SessionCommand::Resume { client } => self.handle_resume(client).await,
            SessionCommand::CollectInfo => self.publish_info(),
            SessionCommand::Destroy => return Some(StopReason::Destroyed),
        }
        None
    }

    // ==================== Outbound delivery pipeline ====================

    async fn handle_dispatch(&mut self, msg: Message) {
        if self.client.is_none() {
            self.queue_message(msg);
            return;
        }
        match msg.qos {
            QoS::AtMostOnce => self.send_qos0(msg).await,
            _ if self.window_full() => self.queue_message(msg),
            _ => self.deliver(msg).await,
        }
    }

    async fn send_qos0(&mut self, mut msg: Message) {
        msg.packet_id = None;
        msg.dup = false;
        if let Some(client) = self.client.clone() {
            let _ = client.deliver(msg).await;
        }
    }

    /// Assign a packet id, send, and start awaiting acknowledgement.
    async fn deliver(&mut self, mut msg: Message) {
        let Some(client) = self.client.clone() else {
            self.queue_message(msg);
            return;
        };
        if client.is_closed() {
            // The liveness watch has not caught up yet; do not burn a
            // packet id on a connection that is already gone.
            self.queue_message(msg);
            return;
        }

        let inflight = &self.inflight;
        let awaiting_comp = &self.awaiting_comp;
        let packet_id = self.packet_ids.allocate(|id| {
            inflight.iter().any(|(pid, _)| *pid == id) || awaiting_comp.contains_key(&id)
        });
        let Some(packet_id) = packet_id else {
            warn!(client_id = %self.client_id, "packet id space exhausted, queueing message");
            self.queue_message(msg);
            return;
        };

        msg.packet_id = Some(packet_id);
        msg.dup = false;
        if client.deliver(msg.clone()).await.is_err() {
            // Connection is going away; park the message until the liveness
            // watch detaches the client or a new one resumes.
            debug!(client_id = %self.client_id, packet_id, "delivery to a closing connection, queueing");
            msg.packet_id = None;
            self.queue_message(msg);
            return;
        }
        self.inflight.push_back((packet_id, msg));
        let token = self
            .timers
            .arm(TimerKind::AckRetry, packet_id, self.config.unack_retry_interval());
        self.awaiting_ack.insert(packet_id, token);
    }

    /// Drain queued messages while the client is online and the inflight
    /// window has room.
    async fn drain_queue(&mut self) {
        while self.client.is_some() && !self.window_full() {
            let Some(msg) = self.mqueue.dequeue() else { break };
            if msg.qos == QoS::AtMostOnce {
                self.send_qos0(msg).await;
            } else {
                self.deliver(msg).await;
            }
        }
    }

    /// Retransmit an inflight message with `dup=true` and the original
    /// packet id, re-arming the retry timer.
    async fn redeliver(&mut self, packet_id: u16) {
        let Some((_, msg)) = self.inflight.iter().find(|(pid, _)| *pid == packet_id) else {
            return;
        };
        let mut msg = msg.clone();
        let Some(client) = self.client.clone() else { return };

        msg.dup = true;
        let _ = client.deliver(msg).await;
        let token = self
            .timers
            .arm(TimerKind::AckRetry, packet_id, self.config.unack_retry_interval());
        if let Some(old) = self.awaiting_ack.insert(packet_id, token) {
            self.timers.cancel(old);
        }
    }

    fn window_full(&self) -> bool {
        self.config.max_inflight > 0 && self.inflight.len() >= self.config.max_inflight
    }

    fn queue_message(&mut self, msg: Message) {
        if let Some(dropped) = self.mqueue.enqueue(msg) {
            warn!(
                client_id = %self.client_id,
                topic = %dropped.topic,
                dropped_total = self.mqueue.dropped(),
                "message queue full, shedding"
            );
        }
    }

    // ==================== QoS 2 receiver (client -> session) ====================

    async fn publish_inbound(&mut self, msg: Message) -> Result<(), SessionError> {
        if msg.qos != QoS::ExactlyOnce {
            // QoS 0/1 publishes belong on the direct router path; accept
            // them anyway so a misrouted caller stays harmless.
            self.router.publish(msg).await;
            return Ok(());
        }

        let packet_id = msg.packet_id.ok_or(SessionError::MissingPacketId {
            qos: msg.qos.as_u8(),
        })?;

        if self.awaiting_rel.contains_key(&packet_id) {
            // DUP retransmit of an exchange we already track.
            debug!(client_id = %self.client_id, packet_id, "duplicate inbound QoS 2 publish");
            return Ok(());
        }

        if self.config.max_awaiting_rel > 0 && self.awaiting_rel.len() >= self.config.max_awaiting_rel
        {
            return Err(SessionError::Dropped {
                capacity: self.config.max_awaiting_rel,
            });
        }

        let token = self
            .timers
            .arm(TimerKind::RelTimeout, packet_id, self.config.await_rel_timeout());
        self.awaiting_rel.insert(packet_id, (msg, token));
        Ok(())
    }

    async fn handle_pubrel(&mut self, packet_id: u16) {
        let Some((msg, token)) = self.awaiting_rel.remove(&packet_id) else {
            debug!(client_id = %self.client_id, packet_id, "PUBREL for unknown packet id");
            return;
        };
        self.timers.cancel(token);
        // The exactly-once commit point: only now does the message reach
        // the rest of the broker.
        self.router.publish(msg).await;
    }

    // ==================== Acknowledgement handling ====================

    async fn handle_puback(&mut self, packet_id: u16) {
        let Some(token) = self.awaiting_ack.remove(&packet_id) else {
            debug!(client_id = %self.client_id, packet_id, "PUBACK for unknown packet id");
            return;
        };
        self.timers.cancel(token);
        if let Some(msg) = self.take_inflight(packet_id) {
            self.hooks.on_message_acked(&self.client_id, &msg).await;
        }
        self.drain_queue().await;
    }

    async fn handle_pubrec(&mut self, packet_id: u16) {
        let Some(token) = self.awaiting_ack.remove(&packet_id) else {
            debug!(client_id = %self.client_id, packet_id, "PUBREC for unknown packet id");
            return;
        };
        self.timers.cancel(token);
        if let Some(msg) = self.take_inflight(packet_id) {
            self.hooks.on_message_acked(&self.client_id, &msg).await;
        }
        let token = self
            .timers
            .arm(TimerKind::CompTimeout, packet_id, self.config.await_rel_timeout());
        self.awaiting_comp.insert(packet_id, token);
        self.drain_queue().await;
    }

    fn handle_pubcomp(&mut self, packet_id: u16) {
        match self.awaiting_comp.remove(&packet_id) {
            Some(token) => self.timers.cancel(token),
            None => debug!(client_id = %self.client_id, packet_id, "PUBCOMP for unknown packet id"),
        }
    }

    fn take_inflight(&mut self, packet_id: u16) -> Option<Message> {
        let idx = self.inflight.iter().position(|(pid, _)| *pid == packet_id)?;
        self.inflight.remove(idx).map(|(_, msg)| msg)
    }

    // ==================== Subscriptions ====================

    async fn handle_subscribe(
        &mut self,
        topics: Vec<(String, QoS)>,
        ack: tokio::sync::oneshot::Sender<Vec<QoS>>,
    ) {
        let topics = self.hooks.on_subscribe(&self.client_id, topics).await;

        let unchanged = topics.iter().all(|(filter, qos)| {
            self.subscriptions
                .iter()
                .any(|(existing, granted)| existing == filter && granted == qos)
        });
        if unchanged {
            let echo = topics.iter().map(|(_, qos)| *qos).collect();
            let _ = ack.send(echo);
            return;
        }

        let granted = self.router.subscribe(&self.client_id, &topics).await;
        let _ = ack.send(granted.clone());

        let mut merged = Vec::with_capacity(topics.len());
        for (i, (filter, requested)) in topics.into_iter().enumerate() {
            let qos = granted.get(i).copied().unwrap_or(requested);
            merged.push((filter.clone(), qos));
            match self
                .subscriptions
                .iter()
                .position(|(existing, _)| *existing == filter)
            {
                Some(idx) => self.subscriptions[idx].1 = qos,
                None => {
                    self.subscriptions.push((filter.clone(), qos));
                    // Retained messages replay only for filters that are
                    // actually new, never on a resubscribe.
                    for mut msg in self.retained.matching(&filter).await {
                        msg.qos = msg.qos.min(qos);
                        self.handle_dispatch(msg).await;
                    }
                }
            }
        }

        self.hooks.on_subscribed(&self.client_id, &merged).await;
    }

    async fn handle_unsubscribe(&mut self, filters: Vec<String>) {
        let filters = self.hooks.on_unsubscribe(&self.client_id, filters).await;
        if filters.is_empty() {
            return;
        }
        self.router.unsubscribe(&self.client_id, &filters).await;
        for filter in &filters {
            match self.subscriptions.iter().position(|(f, _)| f == filter) {
                Some(idx) => {
                    self.subscriptions.remove(idx);
                }
                None => {
                    debug!(client_id = %self.client_id, filter = %filter, "unsubscribe for unknown filter")
                }
            }
        }
    }

    // ==================== Resume / client-down / expiry ====================

    async fn handle_resume(&mut self, new_client: ClientHandle) {
        if let Some(token) = self.expiry_timer.take() {
            self.timers.cancel(token);
        }

        match &self.client {
            Some(old) if *old == new_client => {
                debug!(client_id = %self.client_id, "resume with the current client handle, ignoring");
                return;
            }
            Some(old) => {
                info!(client_id = %self.client_id, "kicking out previous connection");
                if old
                    .kickout(KickoutReason::DuplicateClientId, new_client.clone())
                    .is_err()
                {
                    debug!(client_id = %self.client_id, "old client already gone during takeover");
                }
            }
            None => {}
        }

        // Replay PUBREL for QoS 2 exchanges the client acknowledged with
        // PUBREC but never completed. Sorted for a deterministic order.
        let mut comp_ids: Vec<u16> = self.awaiting_comp.keys().copied().collect();
        comp_ids.sort_unstable();
        for packet_id in comp_ids {
            let _ = new_client.redeliver_rel(packet_id).await;
        }

        for (_, token) in self.awaiting_ack.drain() {
            self.timers.cancel(token);
        }
        for (_, token) in self.awaiting_comp.drain() {
            self.timers.cancel(token);
        }

        self.client = Some(new_client);

        // Redeliver preserved inflight messages, oldest first.
        let packet_ids: Vec<u16> = self.inflight.iter().map(|(pid, _)| *pid).collect();
        for packet_id in packet_ids {
            self.redeliver(packet_id).await;
        }

        self.drain_queue().await;
    }

    fn handle_client_down(&mut self, handle_id: u64) -> Option<StopReason> {
        match &self.client {
            Some(client) if client.handle_id() == handle_id => {}
            _ => {
                debug!(client_id = %self.client_id, handle_id, "client-down for a stale handle, ignoring");
                return None;
            }
        }

        if self.clean_session {
            return Some(StopReason::Disconnected);
        }

        info!(client_id = %self.client_id, "client down, keeping session for reconnect");
        self.client = None;
        let token = self
            .timers
            .arm(TimerKind::SessionExpiry, 0, self.config.expired_after());
        if let Some(old) = self.expiry_timer.replace(token) {
            self.timers.cancel(old);
        }
        None
    }

    fn handle_expired(&mut self) -> Option<StopReason> {
        self.expiry_timer = None;
        if self.client.is_some() {
            debug!(client_id = %self.client_id, "expiry fired after a client reattached, ignoring");
            return None;
        }
        Some(StopReason::Expired)
    }

    // ==================== Timeouts ====================

    async fn handle_timeout(&mut self, kind: TimerKind, packet_id: u16) {
        match kind {
            TimerKind::AckRetry => self.handle_ack_retry(packet_id).await,
            TimerKind::RelTimeout => {
                if let Some((msg, _)) = self.awaiting_rel.remove(&packet_id) {
                    warn!(
                        client_id = %self.client_id,
                        packet_id,
                        topic = %msg.topic,
                        "gave up waiting for PUBREL, dropping inbound QoS 2 message"
                    );
                }
            }
            TimerKind::CompTimeout => {
                if self.awaiting_comp.remove(&packet_id).is_some() {
                    warn!(client_id = %self.client_id, packet_id, "gave up waiting for PUBCOMP");
                }
            }
            TimerKind::SessionExpiry | TimerKind::Collect => {}
        }
    }

    async fn handle_ack_retry(&mut self, packet_id: u16) {
        self.awaiting_ack.remove(&packet_id);

        if self.client.is_none() {
            // Nothing to retransmit to; resume rebuilds retry state from
            // the preserved inflight entries.
            return;
        }

        if self.inflight.iter().any(|(pid, _)| *pid == packet_id) {
            debug!(client_id = %self.client_id, packet_id, "ack timeout, retransmitting");
            self.redeliver(packet_id).await;
        } else {
            debug!(client_id = %self.client_id, packet_id, "retry timer raced an acknowledgement");
            self.drain_queue().await;
        }
    }

    // ==================== Stats / teardown ====================

    fn publish_info(&self) {
        self.registry.register_session(self.info());
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            client_id: self.client_id.clone(),
            clean_sess: self.clean_session,
            subscriptions: self.subscriptions.len(),
            max_inflight: self.config.max_inflight,
            inflight_queue_len: self.inflight.len(),
            message_queue_len: self.mqueue.len(),
            message_dropped: self.mqueue.dropped(),
            awaiting_rel: self.awaiting_rel.len(),
            awaiting_ack: self.awaiting_ack.len(),
            awaiting_comp: self.awaiting_comp.len(),
            created_at: self.created_at,
        }
    }

    async fn teardown(mut self, reason: StopReason) {
        if let Some(token) = self.collect_timer.take() {
            self.timers.cancel(token);
        }
        if let Some(token) = self.expiry_timer.take() {
            self.timers.cancel(token);
        }
        self.timers.clear();
        self.hooks
            .on_session_terminated(&self.client_id, reason)
            .await;
        self.registry.unregister_session(&self.client_id);
        info!(client_id = %self.client_id, %reason, "session terminated");
    }
}

//! Resume and Lifecycle Integration Tests
//!
//! Covers session takeover and persistence:
//! - Full resume after an offline period (PUBREL replay, inflight
//!   redelivery in order, queued-message drain)
//! - Kickout of a live connection on takeover
//! - Clean-session teardown on disconnect
//! - Persistent-session expiry
//! - Explicit destroy

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

use flowbroker::hooks::NoopHooks;
use flowbroker::router::{NoRetained, Router};
use flowbroker::{
    ClientHandle, ClientPacket, InMemoryRegistry, KickoutReason, Message, MqttSession, QoS,
    SessionConfig, SessionDeps, SessionError, SessionInfo,
};

struct SilentRouter;

#[async_trait]
impl Router for SilentRouter {
    async fn publish(&self, _msg: Message) {}

    async fn subscribe(&self, _client_id: &str, topics: &[(String, QoS)]) -> Vec<QoS> {
        topics.iter().map(|(_, qos)| *qos).collect()
    }

    async fn unsubscribe(&self, _client_id: &str, _filters: &[String]) {}
}

fn deps(registry: Arc<InMemoryRegistry>) -> SessionDeps {
    SessionDeps::new(
        Arc::new(SilentRouter),
        Arc::new(NoRetained),
        Arc::new(NoopHooks),
        registry,
    )
}

/// Long timers so retransmits and expiry never interfere unless a test
/// wants them to.
fn quiet_config() -> SessionConfig {
    SessionConfig::builder()
        .unack_retry_interval_ms(60_000)
        .await_rel_timeout_ms(60_000)
        .collect_interval_ms(10)
        .build()
}

async fn recv_packet(rx: &mut Receiver<ClientPacket>) -> ClientPacket {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("timed out waiting for a client packet")
        .expect("client channel closed")
}

fn expect_deliver(packet: ClientPacket) -> Message {
    match packet {
        ClientPacket::Deliver(msg) => msg,
        other => panic!("expected Deliver, got {other:?}"),
    }
}

async fn snapshot_when(
    registry: &InMemoryRegistry,
    client_id: &str,
    pred: impl Fn(&SessionInfo) -> bool,
) -> SessionInfo {
    for _ in 0..50 {
        if let Some(info) = registry.snapshot(client_id) {
            if pred(&info) {
                return info;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "snapshot condition not reached, last: {:?}",
        registry.snapshot(client_id)
    );
}

async fn unregistered_within(registry: &InMemoryRegistry, client_id: &str, ms: u64) {
    for _ in 0..(ms / 10) {
        if registry.snapshot(client_id).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {client_id} still registered after {ms} ms");
}

fn qos1(topic: &str, payload: &'static [u8]) -> Message {
    Message::new(topic, payload, QoS::AtLeastOnce)
}

#[tokio::test]
async fn test_resume_after_offline_replays_in_order() {
    let registry = Arc::new(InMemoryRegistry::new());
    let (client1, mut rx1) = ClientHandle::channel(16);
    let session = MqttSession::start(
        quiet_config(),
        false,
        "c-resume",
        client1,
        deps(registry.clone()),
    );

    // Two QoS 1 inflight entries and one QoS 2 exchange stuck after PUBREC.
    session.dispatcher().dispatch(qos1("r/a", b"A")).await.unwrap();
    session.dispatcher().dispatch(qos1("r/b", b"B")).await.unwrap();
    session
        .dispatcher()
        .dispatch(Message::new("r/c", b"C".as_ref(), QoS::ExactlyOnce))
        .await
        .unwrap();
    assert_eq!(expect_deliver(recv_packet(&mut rx1).await).packet_id, Some(1));
    assert_eq!(expect_deliver(recv_packet(&mut rx1).await).packet_id, Some(2));
    assert_eq!(expect_deliver(recv_packet(&mut rx1).await).packet_id, Some(3));
    session.pubrec(3).await.unwrap();
    snapshot_when(&registry, "c-resume", |i| i.awaiting_comp == 1).await;

    // Client goes away; the persistent session stays.
    drop(rx1);
    snapshot_when(&registry, "c-resume", |i| i.inflight_queue_len == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Traffic while offline is parked in the queue.
    session.dispatcher().dispatch(qos1("r/d", b"D")).await.unwrap();
    snapshot_when(&registry, "c-resume", |i| i.message_queue_len == 1).await;

    // Takeover by a fresh connection.
    let (client2, mut rx2) = ClientHandle::channel(16);
    session.resume(client2).await.unwrap();

    // 1. PUBREL replay for the half-finished QoS 2 exchange.
    match recv_packet(&mut rx2).await {
        ClientPacket::RedeliverRel { packet_id } => assert_eq!(packet_id, 3),
        other => panic!("expected RedeliverRel, got {other:?}"),
    }

    // 2. Inflight redelivery, oldest first, original ids, dup set.
    let a = expect_deliver(recv_packet(&mut rx2).await);
    assert_eq!((a.topic.as_str(), a.packet_id, a.dup), ("r/a", Some(1), true));
    let b = expect_deliver(recv_packet(&mut rx2).await);
    assert_eq!((b.topic.as_str(), b.packet_id, b.dup), ("r/b", Some(2), true));

    // 3. Queued message drains last, fresh id past the replayed ones.
    let d = expect_deliver(recv_packet(&mut rx2).await);
    assert_eq!((d.topic.as_str(), d.packet_id, d.dup), ("r/d", Some(4), false));

    // Ack state was rebuilt for the redelivered messages.
    let info = snapshot_when(&registry, "c-resume", |i| i.awaiting_ack == 3).await;
    assert_eq!(info.awaiting_comp, 0);
    assert_eq!(info.message_queue_len, 0);
}

#[tokio::test]
async fn test_takeover_kicks_out_live_connection() {
    let registry = Arc::new(InMemoryRegistry::new());
    let (client1, mut rx1) = ClientHandle::channel(16);
    let session = MqttSession::start(
        quiet_config(),
        false,
        "c-kick",
        client1,
        deps(registry.clone()),
    );

    session.dispatcher().dispatch(qos1("k/1", b"1")).await.unwrap();
    assert_eq!(expect_deliver(recv_packet(&mut rx1).await).packet_id, Some(1));

    let (client2, mut rx2) = ClientHandle::channel(16);
    session.resume(client2).await.unwrap();

    match recv_packet(&mut rx1).await {
        ClientPacket::Kickout { reason, .. } => {
            assert_eq!(reason, KickoutReason::DuplicateClientId)
        }
        other => panic!("expected Kickout, got {other:?}"),
    }

    // The unacked delivery replays to the new owner, and fresh traffic
    // follows it there.
    let replay = expect_deliver(recv_packet(&mut rx2).await);
    assert_eq!((replay.packet_id, replay.dup), (Some(1), true));

    session.dispatcher().dispatch(qos1("k/2", b"2")).await.unwrap();
    let fresh = expect_deliver(recv_packet(&mut rx2).await);
    assert_eq!((fresh.packet_id, fresh.dup), (Some(2), false));
}

#[tokio::test]
async fn test_resume_with_current_handle_is_noop() {
    let registry = Arc::new(InMemoryRegistry::new());
    let (client, mut rx) = ClientHandle::channel(16);
    let same_handle = client.clone();
    let session = MqttSession::start(
        quiet_config(),
        false,
        "c-self-resume",
        client,
        deps(registry.clone()),
    );

    session.dispatcher().dispatch(qos1("s/1", b"1")).await.unwrap();
    assert_eq!(expect_deliver(recv_packet(&mut rx).await).packet_id, Some(1));

    session.resume(same_handle).await.unwrap();

    // No kickout, no redelivery: the resume was against the same handle.
    let quiet = tokio::time::timeout(Duration::from_millis(80), rx.recv()).await;
    assert!(quiet.is_err(), "expected no packet, got {quiet:?}");

    session.dispatcher().dispatch(qos1("s/2", b"2")).await.unwrap();
    assert_eq!(expect_deliver(recv_packet(&mut rx).await).packet_id, Some(2));
}

#[tokio::test]
async fn test_clean_session_dies_with_client() {
    let registry = Arc::new(InMemoryRegistry::new());
    let (client, rx) = ClientHandle::channel(16);
    let session = MqttSession::start(
        quiet_config(),
        true,
        "c-clean",
        client,
        deps(registry.clone()),
    );
    snapshot_when(&registry, "c-clean", |_| true).await;

    drop(rx);
    unregistered_within(&registry, "c-clean", 500).await;

    // The actor is gone; commands bounce.
    for _ in 0..50 {
        if matches!(session.puback(1).await, Err(SessionError::MailboxClosed)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session mailbox still accepting commands after teardown");
}

#[tokio::test]
async fn test_persistent_session_expires_without_reconnect() {
    let registry = Arc::new(InMemoryRegistry::new());
    let (client, rx) = ClientHandle::channel(16);
    let config = SessionConfig::builder()
        .expired_after_ms(60)
        .collect_interval_ms(10)
        .build();
    let session = MqttSession::start(config, false, "c-ttl", client, deps(registry.clone()));
    snapshot_when(&registry, "c-ttl", |_| true).await;

    drop(rx);
    unregistered_within(&registry, "c-ttl", 800).await;
    drop(session);
}

#[tokio::test]
async fn test_reconnect_before_expiry_cancels_ttl() {
    let registry = Arc::new(InMemoryRegistry::new());
    let (client1, rx1) = ClientHandle::channel(16);
    let config = SessionConfig::builder()
        .expired_after_ms(80)
        .collect_interval_ms(10)
        .build();
    let session = MqttSession::start(config, false, "c-ttl-resume", client1, deps(registry.clone()));

    drop(rx1);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (client2, mut rx2) = ClientHandle::channel(16);
    session.resume(client2).await.unwrap();

    // Well past the original TTL, the session must still be alive.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(registry.snapshot("c-ttl-resume").is_some());

    session.dispatcher().dispatch(qos1("t/1", b"1")).await.unwrap();
    assert_eq!(expect_deliver(recv_packet(&mut rx2).await).packet_id, Some(1));
}

#[tokio::test]
async fn test_destroy_terminates_and_unregisters() {
    let registry = Arc::new(InMemoryRegistry::new());
    let (client, _rx) = ClientHandle::channel(16);
    let session = MqttSession::start(
        quiet_config(),
        false,
        "c-destroy",
        client,
        deps(registry.clone()),
    );
    snapshot_when(&registry, "c-destroy", |_| true).await;

    session.destroy().await.unwrap();
    unregistered_within(&registry, "c-destroy", 500).await;
}

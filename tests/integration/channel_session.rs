// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Channel sessions against an in-process relay server.
//!
//! Covers the open / transmit / receive / close lifecycle over real
//! websockets, including password enforcement and the "not open" paths.

use std::sync::Arc;
use std::time::Duration;

use relaybridge::transport::websocket::WsConnector;
use relaybridge::{ChannelError, ChannelManager, ManagerConfig};
use relaybridge_proto::RelayUrl;
use relaybridge_server::relay::{RelayState, start_server_with_state};

async fn start_relay() -> (RelayUrl, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (RelayUrl::parse(&format!("ws://{addr}")).unwrap(), state)
}

fn manager(base: &RelayUrl) -> ChannelManager<WsConnector> {
    ChannelManager::new(WsConnector::default(), ManagerConfig::new(base.clone()))
}

async fn receive(mgr: &ChannelManager<WsConnector>, channel: &str) -> String {
    tokio::time::timeout(Duration::from_secs(5), mgr.receive(channel))
        .await
        .expect("receive timed out")
        .unwrap()
}

#[tokio::test]
async fn public_channel_round_trip() {
    let (base, _state) = start_relay().await;
    let alice = manager(&base);
    let bob = manager(&base);

    alice.open("lobby", None).await.unwrap();
    bob.open("lobby", None).await.unwrap();

    alice.transmit("lobby", "hi bob").await.unwrap();
    assert_eq!(receive(&bob, "lobby").await, "hi bob");

    bob.transmit("lobby", "hi alice").await.unwrap();
    assert_eq!(receive(&alice, "lobby").await, "hi alice");
}

#[tokio::test]
async fn protected_channel_admits_only_matching_password() {
    let (base, state) = start_relay().await;
    let owner = manager(&base);
    let guest = manager(&base);
    let intruder = manager(&base);

    owner.open("vault", Some("s3cret")).await.unwrap();
    guest.open("vault", Some("s3cret")).await.unwrap();

    let refused = intruder.open("vault", Some("wrongpass")).await;
    assert!(matches!(refused, Err(ChannelError::Forbidden { ref channel }) if channel.as_str() == "vault"));
    assert!(!intruder.is_open("vault"));

    let public_attempt = intruder.open("vault", None).await;
    assert!(matches!(public_attempt, Err(ChannelError::Forbidden { .. })));
    assert_eq!(state.hub.client_count("vault"), 2);

    guest.transmit("vault", "inside").await.unwrap();
    assert_eq!(receive(&owner, "vault").await, "inside");
}

#[tokio::test]
async fn operations_on_unopened_channel_are_not_open() {
    let (base, state) = start_relay().await;
    let mgr = manager(&base);

    assert!(matches!(
        mgr.transmit("ghost", "boo").await,
        Err(ChannelError::NotOpen { .. })
    ));
    assert!(matches!(
        mgr.receive("ghost").await,
        Err(ChannelError::NotOpen { .. })
    ));
    assert_eq!(state.hub.channel_count(), 0);
}

#[tokio::test]
async fn close_forgets_channel_and_leaves_relay() {
    let (base, state) = start_relay().await;
    let mgr = manager(&base);

    mgr.open("lobby", Some("pw")).await.unwrap();
    assert_eq!(mgr.open_channels().len(), 1);

    mgr.close("lobby").await;
    mgr.close("lobby").await;
    assert!(!mgr.is_open("lobby"));
    assert!(matches!(
        mgr.transmit("lobby", "late").await,
        Err(ChannelError::NotOpen { .. })
    ));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.hub.client_count("lobby") > 0 {
        assert!(tokio::time::Instant::now() < deadline, "relay kept the client");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let (base, _state) = start_relay().await;
    let alice = manager(&base);
    let bob = manager(&base);
    alice.open("ordered", None).await.unwrap();
    bob.open("ordered", None).await.unwrap();

    for i in 0..20 {
        alice.transmit("ordered", &format!("msg-{i}")).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(receive(&bob, "ordered").await, format!("msg-{i}"));
    }
}

#[tokio::test]
async fn unreachable_relay_is_connect_error() {
    let base = RelayUrl::parse("ws://127.0.0.1:1").unwrap();
    let mgr = ChannelManager::new(
        WsConnector::new(Duration::from_secs(2)),
        ManagerConfig::new(base),
    );

    let result = mgr.open("lobby", None).await;
    assert!(matches!(result, Err(ChannelError::ConnectError { .. })));
    assert!(!mgr.is_open("lobby"));
}

#[tokio::test]
async fn shutdown_closes_all_channels() {
    let (base, state) = start_relay().await;
    let mgr = manager(&base);
    mgr.open("a", None).await.unwrap();
    mgr.open("b", Some("pw")).await.unwrap();

    mgr.shutdown().await;
    assert!(mgr.open_channels().is_empty());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.hub.channel_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "relay kept channels");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

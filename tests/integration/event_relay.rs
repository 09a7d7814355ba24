// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Asynchronous fan-out of inbound messages as `bridge_message` events.

use std::sync::Arc;
use std::time::Duration;

use relaybridge::transport::websocket::{WsConnection, WsConnector};
use relaybridge::transport::{Connection, Connector, InboundRouter};
use relaybridge::{BridgeEvent, ChannelError, ChannelManager, ManagerConfig};
use relaybridge_proto::{ChannelName, Endpoint, RelayUrl};
use relaybridge_server::relay::{RelayState, start_server_with_state};
use tokio::sync::broadcast;

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

/// A bare connection used as the far end of a channel.
async fn peer(base: &RelayUrl, channel: &str, password: Option<&str>) -> WsConnection {
    let ep = Endpoint::from_raw(base.clone(), channel, password).unwrap();
    WsConnector::default()
        .connect(&ep, InboundRouter::new())
        .await
        .unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<BridgeEvent>) -> (String, String) {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event within timeout")
        .unwrap();
    let BridgeEvent::BridgeMessage { channel, contents } = event;
    (channel.to_string(), contents)
}

fn pair(channel: &str, contents: &str) -> (String, String) {
    (channel.to_string(), contents.to_string())
}

#[tokio::test]
async fn events_are_tagged_with_their_channel() {
    let (base, _state) = start_relay().await;
    let mgr = manager(&base);
    let bus = mgr.start_event_relay().unwrap();
    let mut events = bus.subscribe();

    mgr.open("a", None).await.unwrap();
    mgr.open("b", Some("pw")).await.unwrap();
    let far_a = peer(&base, "a", None).await;
    let far_b = peer(&base, "b", Some("pw")).await;

    far_a.send("a1").await.unwrap();
    assert_eq!(next_event(&mut events).await, pair("a", "a1"));
    far_b.send("b1").await.unwrap();
    assert_eq!(next_event(&mut events).await, pair("b", "b1"));
    far_a.send("a2").await.unwrap();
    assert_eq!(next_event(&mut events).await, pair("a", "a2"));
}

#[tokio::test]
async fn per_channel_order_is_preserved() {
    let (base, _state) = start_relay().await;
    let mgr = manager(&base);
    let mut events = mgr.start_event_relay().unwrap().subscribe();

    mgr.open("feed", None).await.unwrap();
    let far = peer(&base, "feed", None).await;
    for i in 0..10 {
        far.send(&format!("item-{i}")).await.unwrap();
    }
    for i in 0..10 {
        assert_eq!(next_event(&mut events).await, pair("feed", &format!("item-{i}")));
    }
}

#[tokio::test]
async fn channels_opened_before_start_are_relayed() {
    let (base, _state) = start_relay().await;
    let mgr = manager(&base);
    mgr.open("early", None).await.unwrap();

    let mut events = mgr.start_event_relay().unwrap().subscribe();
    let far = peer(&base, "early", None).await;
    far.send("made it").await.unwrap();

    assert_eq!(next_event(&mut events).await, pair("early", "made it"));
}

#[tokio::test]
async fn receive_is_refused_while_relay_runs() {
    let (base, _state) = start_relay().await;
    let mgr = manager(&base);
    mgr.open("a", None).await.unwrap();
    mgr.start_event_relay().unwrap();

    let result = mgr.receive("a").await;
    assert!(matches!(result, Err(ChannelError::EventRelayActive { ref channel }) if *channel == ChannelName::new("a").unwrap()));
    assert!(matches!(
        mgr.start_event_relay(),
        Err(ChannelError::EventRelayAlreadyStarted)
    ));
}

#[tokio::test]
async fn reconnected_channel_keeps_feeding_the_relay() {
    let (base, state) = start_relay().await;
    let mgr = manager(&base);
    let mut events = mgr.start_event_relay().unwrap().subscribe();
    mgr.open("lobby", None).await.unwrap();

    state.disconnect_channel("lobby");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while mgr.link_up("lobby") {
        assert!(tokio::time::Instant::now() < deadline, "link never dropped");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Sending repairs the link; the new connection routes to the relay too.
    let far = peer(&base, "lobby", None).await;
    mgr.transmit("lobby", "back").await.unwrap();
    assert_eq!(far.recv().await.unwrap(), "back");

    far.send("welcome back").await.unwrap();
    assert_eq!(next_event(&mut events).await, pair("lobby", "welcome back"));
}

#[tokio::test]
async fn every_subscriber_sees_every_event() {
    let (base, _state) = start_relay().await;
    let mgr = manager(&base);
    let bus = mgr.start_event_relay().unwrap();
    let mut first = bus.subscribe();
    let mut second = mgr.event_bus().unwrap().subscribe();

    mgr.open("news", None).await.unwrap();
    let far = peer(&base, "news", None).await;
    far.send("extra").await.unwrap();

    assert_eq!(next_event(&mut first).await, pair("news", "extra"));
    assert_eq!(next_event(&mut second).await, pair("news", "extra"));
}

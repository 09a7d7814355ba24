// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Transparent reconnection against an in-process relay server.
//!
//! ## Disconnect simulation
//!
//! Two ways of breaking a link are used:
//! - `RelayState::disconnect_channel` has the relay close every socket of a
//!   channel and forget it, as a relay restart would.
//! - A **TCP proxy** between client and relay is killed, which makes the
//!   relay unreachable so the reconnect itself fails.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relaybridge::transport::websocket::WsConnector;
use relaybridge::transport::{Connection, Connector, InboundRouter, TransportError};
use relaybridge::{ChannelError, ChannelManager, ManagerConfig};
use relaybridge_proto::{Endpoint, RelayUrl};
use relaybridge_server::relay::{RelayState, start_server_with_state};

// =============================================================================
// TCP Proxy helper
// =============================================================================

/// A TCP proxy in front of the relay. Calling `kill()` stops accepting and
/// aborts every proxied connection, so both existing links and new connect
/// attempts fail.
struct TcpProxy {
    /// Address clients should connect to.
    client_addr: std::net::SocketAddr,
    accept_handle: tokio::task::JoinHandle<()>,
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    async fn new(backend: std::net::SocketAddr) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_addr = listener.local_addr().unwrap();
        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let conn_handles_clone = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            while let Ok((mut client_stream, _)) = listener.accept().await {
                let conn_handle = tokio::spawn(async move {
                    let Ok(mut backend_stream) = tokio::net::TcpStream::connect(backend).await
                    else {
                        return;
                    };
                    let _ = tokio::io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                        .await;
                });
                conn_handles_clone.lock().push(conn_handle);
            }
        });

        Self {
            client_addr,
            accept_handle,
            conn_handles,
        }
    }

    fn kill(self) {
        self.accept_handle.abort();
        for h in self.conn_handles.lock().iter() {
            h.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (addr, state)
}

fn base_url(addr: std::net::SocketAddr) -> RelayUrl {
    RelayUrl::parse(&format!("ws://{addr}")).unwrap()
}

fn manager(base: &RelayUrl) -> ChannelManager<WsConnector> {
    ChannelManager::new(
        WsConnector::new(Duration::from_secs(2)),
        ManagerConfig::new(base.clone()),
    )
}

/// Poll `check` every 10ms until it holds, panicking after five seconds.
async fn wait_until(description: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timeout waiting for {description}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn transmit_reconnects_after_relay_drops_channel() {
    let (addr, state) = start_relay().await;
    let base = base_url(addr);
    let alice = manager(&base);
    let bob = Arc::new(manager(&base));

    alice.open("lobby", Some("pw")).await.unwrap();
    bob.open("lobby", Some("pw")).await.unwrap();

    assert_eq!(state.disconnect_channel("lobby"), 2);
    wait_until("alice link down", || !alice.link_up("lobby")).await;
    wait_until("bob link down", || !bob.link_up("lobby")).await;

    // Bob's receive fails on the dead link, reconnects and waits again.
    let bob_rx = {
        let bob = Arc::clone(&bob);
        tokio::spawn(async move { bob.receive("lobby").await })
    };
    wait_until("bob rejoined", || state.hub.client_count("lobby") == 1).await;

    // Alice's send fails on the dead link and is retried on a fresh one.
    alice.transmit("lobby", "still here").await.unwrap();
    assert!(alice.link_up("lobby"));
    assert_eq!(state.hub.client_count("lobby"), 2);

    let got = tokio::time::timeout(Duration::from_secs(5), bob_rx)
        .await
        .expect("bob never received")
        .unwrap()
        .unwrap();
    assert_eq!(got, "still here");
}

#[tokio::test]
async fn reconnect_with_changed_password_is_forbidden() {
    let (addr, state) = start_relay().await;
    let base = base_url(addr);
    let alice = manager(&base);

    alice.open("vault", Some("original")).await.unwrap();
    state.disconnect_channel("vault");
    wait_until("alice link down", || !alice.link_up("vault")).await;

    // Someone else re-creates the channel with a different password.
    let ep = Endpoint::from_raw(base.clone(), "vault", Some("hijacked")).unwrap();
    let squatter = WsConnector::default()
        .connect(&ep, InboundRouter::new())
        .await
        .unwrap();
    assert!(squatter.is_connected());

    let result = alice.transmit("vault", "hello?").await;
    assert!(
        matches!(result, Err(ChannelError::ReconnectForbidden { ref channel }) if channel.as_str() == "vault"),
        "expected ReconnectForbidden, got {result:?}"
    );
    // The entry survives; the caller decides whether to close it.
    assert!(alice.is_open("vault"));
    assert_eq!(state.hub.client_count("vault"), 1);
}

#[tokio::test]
async fn unreachable_relay_fails_reconnect() {
    let (addr, _state) = start_relay().await;
    let proxy = TcpProxy::new(addr).await;
    let base = base_url(proxy.client_addr);
    let alice = manager(&base);

    alice.open("lobby", None).await.unwrap();
    proxy.kill();
    wait_until("alice link down", || !alice.link_up("lobby")).await;

    let result = alice.transmit("lobby", "anyone?").await;
    assert!(
        matches!(
            result,
            Err(ChannelError::ReconnectFailed {
                source: TransportError::Io(_),
                ..
            })
        ),
        "expected ReconnectFailed(Io), got {result:?}"
    );
    assert!(alice.is_open("lobby"));
}

#[tokio::test]
async fn receive_reconnects_once_and_reports_second_failure() {
    let (addr, state) = start_relay().await;
    let base = base_url(addr);
    let alice = Arc::new(manager(&base));
    alice.open("lobby", None).await.unwrap();

    let pending = {
        let alice = Arc::clone(&alice);
        tokio::spawn(async move { alice.receive("lobby").await })
    };

    // First drop: receive reconnects and keeps waiting on the new link.
    state.disconnect_channel("lobby");
    wait_until("alice rejoined", || state.hub.client_count("lobby") == 1).await;

    // Second drop: the retried receive fails and is reported.
    state.disconnect_channel("lobby");
    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("receive never returned")
        .unwrap();
    assert!(
        matches!(
            result,
            Err(ChannelError::RetryFailed {
                source: TransportError::ConnectionClosed,
                ..
            })
        ),
        "expected RetryFailed, got {result:?}"
    );
}

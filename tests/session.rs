//! End-to-end tests: two in-process nodes over loopback TCP.

use libp2p::{identity, Multiaddr, PeerId};
use peerchat::net::DeliveryError;
use peerchat::network::{NetworkHandle, NetworkLayer};
use peerchat::types::SessionEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(20);

struct TestNode {
    peer_id: PeerId,
    handle: NetworkHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<()>,
}

async fn spawn_node() -> TestNode {
    let keypair = identity::Keypair::generate_ed25519();
    let peer_id = keypair.public().to_peer_id();
    let listen: Multiaddr = "/ip4/127.0.0.1/tcp/0".parse().unwrap();

    let (mut layer, handle) = NetworkLayer::new(keypair, vec![listen]).unwrap();
    let (event_tx, events) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let _ = layer.run(event_tx).await;
    });

    TestNode {
        peer_id,
        handle,
        events,
        task,
    }
}

/// Waits for the next event matching `pick`, skipping everything else.
async fn wait_for<T>(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut pick: impl FnMut(SessionEvent) -> Option<T>,
) -> T {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if let Some(value) = pick(event) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn connect(a: &mut TestNode, b: &mut TestNode) {
    let addr = wait_for(&mut b.events, |e| match e {
        SessionEvent::NewListenAddr { addr } => Some(addr),
        _ => None,
    })
    .await;

    a.handle.dial(addr).await.unwrap();

    let b_id = b.peer_id;
    wait_for(&mut a.events, |e| match e {
        SessionEvent::PeerConnected { peer, .. } if peer == b_id => Some(()),
        _ => None,
    })
    .await;

    let a_id = a.peer_id;
    wait_for(&mut b.events, |e| match e {
        SessionEvent::PeerConnected { peer, .. } if peer == a_id => Some(()),
        _ => None,
    })
    .await;
}

#[tokio::test]
async fn delivers_plain_text_between_nodes() {
    let mut x = spawn_node().await;
    let mut y = spawn_node().await;
    connect(&mut x, &mut y).await;

    x.handle.set_target(y.peer_id).unwrap();
    let delivered_to = x.handle.send_message("ok").await.unwrap();
    assert_eq!(delivered_to, y.peer_id);

    let x_id = x.peer_id;
    let text = wait_for(&mut y.events, |e| match e {
        SessionEvent::MessageReceived { peer, text } if peer == x_id => Some(text),
        _ => None,
    })
    .await;
    assert_eq!(text, "ok");

    x.task.abort();
    y.task.abort();
}

#[tokio::test]
async fn json_envelope_renders_only_the_text_field() {
    let mut x = spawn_node().await;
    let mut y = spawn_node().await;
    connect(&mut x, &mut y).await;

    x.handle.set_target(y.peer_id).unwrap();
    x.handle
        .send_message(r#"{"text":"ok","extra":1}"#)
        .await
        .unwrap();

    let text = wait_for(&mut y.events, |e| match e {
        SessionEvent::MessageReceived { text, .. } => Some(text),
        _ => None,
    })
    .await;
    assert_eq!(text, "ok");

    x.task.abort();
    y.task.abort();
}

#[tokio::test]
async fn large_message_arrives_as_one_piece() {
    let mut x = spawn_node().await;
    let mut y = spawn_node().await;
    connect(&mut x, &mut y).await;

    // Well past any single read or TCP segment; the receiver must buffer
    // to stream close so the envelope decodes whole, not as fragments.
    let body = "m".repeat(64 * 1024);
    x.handle.set_target(y.peer_id).unwrap();
    x.handle
        .send_message(format!(r#"{{"text":"{}"}}"#, body))
        .await
        .unwrap();

    let text = wait_for(&mut y.events, |e| match e {
        SessionEvent::MessageReceived { text, .. } => Some(text),
        _ => None,
    })
    .await;
    assert_eq!(text.len(), body.len());
    assert_eq!(text, body);

    x.task.abort();
    y.task.abort();
}

#[tokio::test]
async fn auto_selected_target_receives_without_explicit_selection() {
    let mut x = spawn_node().await;
    let mut y = spawn_node().await;
    connect(&mut x, &mut y).await;

    // First connection auto-selected the peer; no explicit target needed.
    let delivered_to = x.handle.send_message("hello").await.unwrap();
    assert_eq!(delivered_to, y.peer_id);

    let text = wait_for(&mut y.events, |e| match e {
        SessionEvent::MessageReceived { text, .. } => Some(text),
        _ => None,
    })
    .await;
    assert_eq!(text, "hello");

    x.task.abort();
    y.task.abort();
}

#[tokio::test]
async fn send_with_no_connections_fails_without_dialing() {
    let z = spawn_node().await;

    let err = z.handle.send_message("nobody there").await.unwrap_err();
    assert!(matches!(err, DeliveryError::NoTarget));

    assert!(z.handle.connected_peers().await.unwrap().is_empty());

    z.task.abort();
}

#[tokio::test]
async fn disconnect_clears_registry_and_later_sends_fail() {
    let mut x = spawn_node().await;
    let mut y = spawn_node().await;
    connect(&mut x, &mut y).await;

    x.handle.set_target(y.peer_id).unwrap();
    x.handle.send_message("before").await.unwrap();

    // Tear Y down; its swarm drops and the connection closes.
    y.task.abort();
    drop(y.events);

    let y_id = y.peer_id;
    wait_for(&mut x.events, |e| match e {
        SessionEvent::PeerDisconnected { peer } if peer == y_id => Some(()),
        _ => None,
    })
    .await;

    assert!(x.handle.connected_peers().await.unwrap().is_empty());
    assert_eq!(x.handle.target().await.unwrap(), None);

    let err = x.handle.send_message("after").await.unwrap_err();
    assert!(matches!(err, DeliveryError::NoTarget));

    x.task.abort();
}

#[tokio::test]
async fn stats_count_loopback_connections_as_other() {
    let mut x = spawn_node().await;
    let mut y = spawn_node().await;
    connect(&mut x, &mut y).await;

    let stats = x.handle.stats().await.unwrap();
    assert_eq!(stats.peer_count, 1);
    assert_eq!(stats.connection_count, 1);
    assert_eq!(stats.transports.other, 1);
    assert_eq!(stats.transports.total(), 1);

    x.task.abort();
    y.task.abort();
}

//! Connection bookkeeping and outbound target selection.
//!
//! The registry is the only place connection state and the current target
//! live. All mutation happens from the session layer's event loop, so the
//! rest of the crate reads it through commands rather than touching shared
//! maps directly.

use libp2p::{swarm::ConnectionId, Multiaddr, PeerId};
use std::collections::HashMap;
use tracing::debug;

/// One live connection to a remote peer, as reported by the swarm.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    pub id: ConnectionId,
    pub peer: PeerId,
    pub remote_addr: Multiaddr,
}

/// Tracks, per remote peer, the ordered set of currently open connections,
/// plus the preferred peer for outbound sends.
///
/// An entry exists for a peer exactly while at least one connection to it is
/// open; on peer disconnect the whole entry is removed, never left empty.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<PeerId, Vec<PeerConnection>>,
    /// Peer insertion order, so scans over all connections are deterministic.
    order: Vec<PeerId>,
    target: Option<PeerId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly established connection.
    ///
    /// The first peer to connect becomes the target when none is selected
    /// yet, so a fresh node can reply without an explicit selection.
    pub fn on_connect(&mut self, conn: PeerConnection) {
        let peer = conn.peer;

        if !self.connections.contains_key(&peer) {
            self.order.push(peer);
        }
        self.connections.entry(peer).or_default().push(conn);

        if self.target.is_none() {
            debug!(%peer, "auto-selected message target");
            self.target = Some(peer);
        }
    }

    /// Drops every connection to `peer`.
    ///
    /// The swarm's disconnect signal is per peer, so the entry goes away as
    /// a whole. A target pointing at the departed peer is cleared.
    pub fn on_disconnect(&mut self, peer: &PeerId) {
        self.connections.remove(peer);
        self.order.retain(|p| p != peer);

        if self.target.as_ref() == Some(peer) {
            debug!(%peer, "message target disconnected, clearing selection");
            self.target = None;
        }
    }

    /// Live connections to `peer`, in the order they were established.
    pub fn connections_for(&self, peer: &PeerId) -> &[PeerConnection] {
        self.connections.get(peer).map_or(&[], Vec::as_slice)
    }

    /// Flattened view of every open connection, in peer insertion order.
    pub fn all_connections(&self) -> impl Iterator<Item = &PeerConnection> {
        self.order
            .iter()
            .filter_map(|peer| self.connections.get(peer))
            .flatten()
    }

    /// Peers with at least one open connection.
    pub fn connected_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.order.iter()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.values().map(Vec::len).sum()
    }

    pub fn target(&self) -> Option<PeerId> {
        self.target
    }

    /// Pins the outbound target. Staleness is tolerated; the selection is
    /// re-checked against live connections at send time.
    pub fn set_target(&mut self, peer: PeerId) {
        self.target = Some(peer);
    }

    /// Picks the connection to deliver the next outbound message on.
    ///
    /// The explicit selection wins when it still has a live connection.
    /// Otherwise the registry scans every connection and takes the first
    /// whose peer advertises the chat protocol (per `advertises_chat`),
    /// remembering that peer for future sends. Returns `None` when nothing
    /// is deliverable; the caller must not dial implicitly.
    pub fn resolve_target(
        &mut self,
        advertises_chat: impl Fn(&PeerId) -> bool,
    ) -> Option<&PeerConnection> {
        let chosen = match self.target {
            Some(peer) if !self.connections_for(&peer).is_empty() => peer,
            _ => {
                let fallback = self
                    .all_connections()
                    .find(|conn| advertises_chat(&conn.peer))?
                    .peer;
                debug!(peer = %fallback, "resolved target from protocol advertisement");
                self.target = Some(fallback);
                fallback
            }
        };

        self.connections_for(&chosen).first()
    }
}

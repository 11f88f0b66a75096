use crate::net::TransportTally;
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};

/// One entry in the shared presence directory: a display name and the
/// multiaddress the peer is currently reachable on. Field names match the
/// registry's JSON wire format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PresenceEntry {
    pub name: String,
    pub multiaddr: String,
}

/// Events the session layer and the presence poller surface to whatever
/// front end is rendering them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A decoded chat message from a remote peer.
    MessageReceived { peer: PeerId, text: String },
    /// First connection to a peer was established.
    PeerConnected { peer: PeerId, remote_addr: Multiaddr },
    /// The last connection to a peer went away.
    PeerDisconnected { peer: PeerId },
    /// The swarm started listening on a new address.
    NewListenAddr { addr: Multiaddr },
    /// A fresh snapshot of the presence directory.
    PresenceUpdate { entries: Vec<PresenceEntry> },
}

/// Point-in-time connection statistics.
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub peer_count: usize,
    pub connection_count: usize,
    pub transports: TransportTally,
    pub listen_addrs: Vec<Multiaddr>,
}

pub mod chat;
pub mod transport;

use anyhow::Result;
use libp2p::{
    core::{transport::Boxed, upgrade::Version},
    identity, noise, tcp, websocket, yamux, PeerId, Transport,
};

// Type alias for transport
type BoxedTransport = Boxed<(PeerId, libp2p::core::muxing::StreamMuxerBox)>;

pub use chat::{chat_protocol, DeliveryError, CHAT_PROTOCOL};
pub use transport::{classify, tally, TransportCategory, TransportTally};

/// Builds the swarm transport: TCP and websocket-over-TCP, both upgraded
/// with noise and yamux.
pub fn build_transport(keypair: &identity::Keypair) -> Result<BoxedTransport> {
    let tcp = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    let ws = websocket::WsConfig::new(tcp::tokio::Transport::new(
        tcp::Config::default().nodelay(true),
    ));
    let noise = noise::Config::new(keypair)?;
    let yamux = yamux::Config::default();

    let transport = tcp
        .or_transport(ws)
        .upgrade(Version::V1)
        .authenticate(noise)
        .multiplex(yamux)
        .boxed();

    Ok(transport)
}

//! Classification of remote addresses into transport categories.
//!
//! Used only for the statistics display: each open connection's remote
//! multiaddress is counted under exactly one category.

use libp2p::{multiaddr::Protocol, Multiaddr};
use std::fmt;

/// The closed set of transport kinds shown in connection statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCategory {
    CircuitRelay,
    WebRtc,
    WebSockets,
    WebSocketsSecure,
    WebTransport,
    Other,
}

impl fmt::Display for TransportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportCategory::CircuitRelay => "Circuit Relay",
            TransportCategory::WebRtc => "WebRTC",
            TransportCategory::WebSockets => "WebSockets",
            TransportCategory::WebSocketsSecure => "WebSockets (secure)",
            TransportCategory::WebTransport => "WebTransport",
            TransportCategory::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Categorizes a remote address. Matchers apply in a fixed order and the
/// first hit wins: WebRTC before the websocket variants (a relayed WebRTC
/// address also contains the relay hop), and the plain/secure/WebTransport
/// matchers only fire for addresses that are not relay-wrapped, so a
/// connection through a relay counts as Circuit Relay rather than as the
/// relay's own transport.
pub fn classify(addr: &Multiaddr) -> TransportCategory {
    let mut webrtc = false;
    let mut ws = false;
    let mut wss = false;
    let mut webtransport = false;
    let mut circuit = false;

    for protocol in addr.iter() {
        match protocol {
            Protocol::WebRTC | Protocol::WebRTCDirect => webrtc = true,
            Protocol::Ws(_) => ws = true,
            Protocol::Wss(_) => wss = true,
            Protocol::WebTransport => webtransport = true,
            Protocol::P2pCircuit => circuit = true,
            _ => {}
        }
    }

    // Fallback for variant textual encodings the component scan misses.
    if !webrtc && addr.to_string().contains("/webrtc") {
        webrtc = true;
    }

    if webrtc {
        TransportCategory::WebRtc
    } else if ws && !circuit {
        TransportCategory::WebSockets
    } else if wss && !circuit {
        TransportCategory::WebSocketsSecure
    } else if webtransport && !circuit {
        TransportCategory::WebTransport
    } else if circuit {
        TransportCategory::CircuitRelay
    } else {
        TransportCategory::Other
    }
}

/// Per-category connection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportTally {
    pub circuit_relay: usize,
    pub webrtc: usize,
    pub websockets: usize,
    pub websockets_secure: usize,
    pub webtransport: usize,
    pub other: usize,
}

impl TransportTally {
    pub fn record(&mut self, category: TransportCategory) {
        match category {
            TransportCategory::CircuitRelay => self.circuit_relay += 1,
            TransportCategory::WebRtc => self.webrtc += 1,
            TransportCategory::WebSockets => self.websockets += 1,
            TransportCategory::WebSocketsSecure => self.websockets_secure += 1,
            TransportCategory::WebTransport => self.webtransport += 1,
            TransportCategory::Other => self.other += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.circuit_relay
            + self.webrtc
            + self.websockets
            + self.websockets_secure
            + self.webtransport
            + self.other
    }
}

/// Tallies the remote addresses of all current connections.
pub fn tally<'a>(addrs: impl Iterator<Item = &'a Multiaddr>) -> TransportTally {
    let mut counts = TransportTally::default();
    for addr in addrs {
        counts.record(classify(addr));
    }
    counts
}

impl fmt::Display for TransportTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circuit Relay: {}, WebRTC: {}, WebSockets: {}, WebSockets (secure): {}, WebTransport: {}, Other: {}",
            self.circuit_relay,
            self.webrtc,
            self.websockets,
            self.websockets_secure,
            self.webtransport,
            self.other
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn classifies_plain_and_secure_websockets() {
        assert_eq!(
            classify(&addr("/ip4/192.0.2.1/tcp/4001/ws")),
            TransportCategory::WebSockets
        );
        assert_eq!(
            classify(&addr("/dns4/relay.example.com/tcp/443/wss")),
            TransportCategory::WebSocketsSecure
        );
    }

    #[test]
    fn classifies_webrtc_never_as_other() {
        assert_eq!(
            classify(&addr("/ip4/192.0.2.1/udp/4001/webrtc-direct")),
            TransportCategory::WebRtc
        );
        assert_eq!(classify(&addr("/webrtc")), TransportCategory::WebRtc);
    }

    #[test]
    fn relayed_webrtc_counts_as_webrtc() {
        let relayed = addr("/dns4/relay.example.com/tcp/443/wss/p2p-circuit/webrtc");
        assert_eq!(classify(&relayed), TransportCategory::WebRtc);
    }

    #[test]
    fn relay_wrapped_websocket_counts_as_circuit_relay() {
        let relayed = addr("/dns4/relay.example.com/tcp/443/wss/p2p-circuit");
        assert_eq!(classify(&relayed), TransportCategory::CircuitRelay);
    }

    #[test]
    fn classifies_webtransport() {
        assert_eq!(
            classify(&addr("/ip4/192.0.2.1/udp/4001/quic-v1/webtransport")),
            TransportCategory::WebTransport
        );
    }

    #[test]
    fn unrecognized_addresses_count_as_other_once() {
        let plain = addr("/ip4/127.0.0.1/tcp/4001");
        assert_eq!(classify(&plain), TransportCategory::Other);

        let counts = tally([plain.clone(), addr("/ip4/127.0.0.1/tcp/4001/ws")].iter());
        assert_eq!(counts.other, 1);
        assert_eq!(counts.websockets, 1);
        assert_eq!(counts.total(), 2);
    }
}

use crate::net::{build_transport, chat, chat_protocol, DeliveryError, CHAT_PROTOCOL};
use crate::registry::{ConnectionRegistry, PeerConnection};
use crate::types::{NodeStats, SessionEvent};
use anyhow::{anyhow, Result};
use futures::StreamExt;
use libp2p::{
    identify, identity, ping,
    swarm::{NetworkBehaviour, Swarm, SwarmEvent},
    Multiaddr, PeerId, StreamProtocol,
};
use libp2p_stream::{Control, IncomingStreams};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Identify protocol version string advertised to peers.
const IDENTIFY_PROTOCOL: &str = "/peerchat/1.0.0";

#[derive(NetworkBehaviour)]
pub struct SessionBehaviour {
    pub chat: libp2p_stream::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

/// The session layer actor.
///
/// Owns the swarm and all mutable session state: the connection registry,
/// the target selection and the per-peer advertised-protocol directory.
/// Everything else talks to it through a [`NetworkHandle`], so a different
/// ownership model could be swapped in without touching callers.
pub struct NetworkLayer {
    swarm: Swarm<SessionBehaviour>,
    command_receiver: mpsc::UnboundedReceiver<SessionCommand>,
    registry: ConnectionRegistry,
    /// Protocols each connected peer advertised via identify.
    advertised: HashMap<PeerId, Vec<StreamProtocol>>,
    control: Control,
    /// Taken by `run` when the inbound acceptor is spawned.
    incoming: Option<IncomingStreams>,
}

#[derive(Debug)]
pub enum SessionCommand {
    SendMessage {
        text: String,
        response: oneshot::Sender<Result<PeerId, DeliveryError>>,
    },
    Dial {
        addr: Multiaddr,
        response: oneshot::Sender<Result<()>>,
    },
    SetTarget {
        peer: PeerId,
    },
    GetTarget {
        response: oneshot::Sender<Option<PeerId>>,
    },
    GetConnectedPeers {
        response: oneshot::Sender<Vec<PeerId>>,
    },
    GetListenAddrs {
        response: oneshot::Sender<Vec<Multiaddr>>,
    },
    GetStats {
        response: oneshot::Sender<NodeStats>,
    },
}

#[derive(Clone)]
pub struct NetworkHandle {
    command_sender: mpsc::UnboundedSender<SessionCommand>,
}

impl NetworkHandle {
    /// Sends `text` to the resolved target peer. Returns the peer the
    /// message went to, or the delivery failure; no retry, no implicit dial.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<PeerId, DeliveryError> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(SessionCommand::SendMessage {
                text: text.into(),
                response: tx,
            })
            .map_err(|_| DeliveryError::Closed)?;

        rx.await.map_err(|_| DeliveryError::Closed)?
    }

    /// Dials a multiaddress. Failures are surfaced for the caller to retry
    /// manually.
    pub async fn dial(&self, addr: Multiaddr) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(SessionCommand::Dial { addr, response: tx })?;
        rx.await?
    }

    /// Pins the explicit outbound target.
    pub fn set_target(&self, peer: PeerId) -> Result<()> {
        self.command_sender
            .send(SessionCommand::SetTarget { peer })?;
        Ok(())
    }

    pub async fn target(&self) -> Result<Option<PeerId>> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(SessionCommand::GetTarget { response: tx })?;
        Ok(rx.await?)
    }

    pub async fn connected_peers(&self) -> Result<Vec<PeerId>> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(SessionCommand::GetConnectedPeers { response: tx })?;
        Ok(rx.await?)
    }

    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(SessionCommand::GetListenAddrs { response: tx })?;
        Ok(rx.await?)
    }

    pub async fn stats(&self) -> Result<NodeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(SessionCommand::GetStats { response: tx })?;
        Ok(rx.await?)
    }
}

impl NetworkLayer {
    pub fn new(
        keypair: identity::Keypair,
        listen_addrs: Vec<Multiaddr>,
    ) -> Result<(Self, NetworkHandle)> {
        let peer_id = keypair.public().to_peer_id();
        let transport = build_transport(&keypair)?;

        let ping_config = ping::Config::new()
            .with_interval(Duration::from_secs(30))
            .with_timeout(Duration::from_secs(10));

        let behaviour = SessionBehaviour {
            chat: libp2p_stream::Behaviour::new(),
            identify: identify::Behaviour::new(identify::Config::new(
                IDENTIFY_PROTOCOL.to_string(),
                keypair.public(),
            )),
            ping: ping::Behaviour::new(ping_config),
        };

        // Register the chat protocol once, before the swarm starts; every
        // inbound stream for it lands on this acceptor.
        let mut control = behaviour.chat.new_control();
        let incoming = control
            .accept(chat_protocol())
            .map_err(|_| anyhow!("chat protocol handler already registered"))?;

        let swarm_config = libp2p::swarm::Config::with_tokio_executor()
            .with_idle_connection_timeout(Duration::from_secs(60 * 60));

        let mut swarm = Swarm::new(transport, behaviour, peer_id, swarm_config);

        for addr in listen_addrs {
            swarm.listen_on(addr)?;
        }

        let (command_sender, command_receiver) = mpsc::unbounded_channel();

        let layer = NetworkLayer {
            swarm,
            command_receiver,
            registry: ConnectionRegistry::new(),
            advertised: HashMap::new(),
            control,
            incoming: Some(incoming),
        };

        info!("Session layer initialized for peer: {}", peer_id);

        Ok((layer, NetworkHandle { command_sender }))
    }

    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    pub async fn run(&mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Result<()> {
        info!("Starting session event loop");

        if let Some(incoming) = self.incoming.take() {
            tokio::spawn(chat::run_inbound(incoming, events.clone()));
        }

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    if let Err(e) = self.handle_swarm_event(event, &events) {
                        error!("Error handling swarm event: {}", e);
                    }
                }

                command = self.command_receiver.recv() => {
                    match command {
                        Some(cmd) => {
                            if let Err(e) = self.handle_command(cmd) {
                                error!("Error handling command: {}", e);
                            }
                        }
                        None => {
                            info!("Command channel closed, shutting down session layer");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<SessionBehaviourEvent>,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<()> {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on: {}", address);
                let _ = events.send(SessionEvent::NewListenAddr { addr: address });
            }

            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                let remote_addr = endpoint.get_remote_address().clone();
                info!("Connection established with peer: {} at {}", peer_id, remote_addr);

                self.registry.on_connect(PeerConnection {
                    id: connection_id,
                    peer: peer_id,
                    remote_addr: remote_addr.clone(),
                });
                let _ = events.send(SessionEvent::PeerConnected {
                    peer: peer_id,
                    remote_addr,
                });
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                cause,
                num_established,
                ..
            } => {
                info!("Connection to {} closed (cause: {:?})", peer_id, cause);

                // The stack's disconnect signal is per peer: only the last
                // closing connection tears the registry entry down.
                if num_established == 0 {
                    self.registry.on_disconnect(&peer_id);
                    self.advertised.remove(&peer_id);
                    let _ = events.send(SessionEvent::PeerDisconnected { peer: peer_id });
                }
            }

            SwarmEvent::Behaviour(SessionBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!(
                    "Peer {} advertises {} protocols",
                    peer_id,
                    info.protocols.len()
                );
                self.advertised.insert(peer_id, info.protocols);
            }

            SwarmEvent::Behaviour(SessionBehaviourEvent::Ping(ping::Event {
                peer, result, ..
            })) => match result {
                Ok(rtt) => {
                    trace!("Ping to {} successful: RTT is {:?}", peer, rtt);
                }
                Err(failure) => {
                    warn!("Ping to {} failed: {:?}", peer, failure);
                }
            },

            SwarmEvent::IncomingConnection { .. } => {
                trace!("Incoming connection");
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!("Outgoing connection error to {:?}: {}", peer_id, error);
            }

            SwarmEvent::IncomingConnectionError { error, .. } => {
                warn!("Incoming connection error: {}", error);
            }

            _ => {}
        }

        Ok(())
    }

    fn handle_command(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::SendMessage { text, response } => {
                let advertised = &self.advertised;
                let chosen = self.registry.resolve_target(|peer| {
                    advertised
                        .get(peer)
                        .is_some_and(|protocols| {
                            protocols.iter().any(|p| p.as_ref() == CHAT_PROTOCOL)
                        })
                });

                match chosen {
                    None => {
                        warn!("No deliverable connection for outbound message");
                        let _ = response.send(Err(DeliveryError::NoTarget));
                    }
                    Some(conn) => {
                        let peer = conn.peer;
                        let mut control = self.control.clone();

                        // The open/write runs as its own task so a slow
                        // stream negotiation never stalls the event loop.
                        tokio::spawn(async move {
                            let result = chat::send_message(&mut control, peer, &text)
                                .await
                                .map(|()| peer);
                            if let Err(e) = &result {
                                warn!("Message delivery to {} failed: {}", peer, e);
                            }
                            let _ = response.send(result);
                        });
                    }
                }
            }

            SessionCommand::Dial { addr, response } => {
                debug!("Dialing {}", addr);
                let result = self
                    .swarm
                    .dial(addr.clone())
                    .map_err(|e| anyhow!("failed to dial {}: {}", addr, e));
                if let Err(e) = &result {
                    warn!("{}", e);
                }
                let _ = response.send(result);
            }

            SessionCommand::SetTarget { peer } => {
                debug!("Explicit message target set to {}", peer);
                self.registry.set_target(peer);
            }

            SessionCommand::GetTarget { response } => {
                let _ = response.send(self.registry.target());
            }

            SessionCommand::GetConnectedPeers { response } => {
                let peers: Vec<PeerId> = self.registry.connected_peers().copied().collect();
                let _ = response.send(peers);
            }

            SessionCommand::GetListenAddrs { response } => {
                let addrs: Vec<Multiaddr> = self.swarm.listeners().cloned().collect();
                let _ = response.send(addrs);
            }

            SessionCommand::GetStats { response } => {
                let transports =
                    crate::net::tally(self.registry.all_connections().map(|c| &c.remote_addr));
                let stats = NodeStats {
                    peer_count: self.registry.connected_peers().count(),
                    connection_count: self.registry.connection_count(),
                    transports,
                    listen_addrs: self.swarm.listeners().cloned().collect(),
                };
                let _ = response.send(stats);
            }
        }

        Ok(())
    }
}

use crate::app::setup::PreparedApp;
use crate::network::{NetworkHandle, NetworkLayer};
use crate::presence::{self, DirectoryClient};
use crate::types::{PresenceEntry, SessionEvent};
use anyhow::Result;
use libp2p::{Multiaddr, PeerId};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

/// Runs the interactive chat node until stdin closes or `/quit`.
///
/// All session logic lives in the network layer and the presence client;
/// this loop only wires their events and commands to the terminal.
pub async fn run(prepared: PreparedApp) -> Result<()> {
    let PreparedApp {
        args,
        port,
        keypair,
        display_name,
    } = prepared;

    let local_peer_id = keypair.public().to_peer_id();
    let listen_addr = Multiaddr::from_str(&format!("/ip4/0.0.0.0/tcp/{}", port))?;
    let (mut network_layer, network) = NetworkLayer::new(keypair, vec![listen_addr])?;

    let directory = DirectoryClient::new(&args.directory)?;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();

    tokio::spawn({
        let events = event_tx.clone();
        async move {
            if let Err(e) = network_layer.run(events).await {
                error!("Session layer error: {}", e);
            }
        }
    });

    tokio::spawn(presence::run_poller(directory.clone(), event_tx));

    for addr in &args.dial {
        dial_address(&network, addr).await;
    }

    // Latest presence snapshot, shared between the event printer and the
    // command loop so `/select` can look names up.
    let friends: Arc<Mutex<Vec<PresenceEntry>>> = Arc::new(Mutex::new(Vec::new()));

    tokio::spawn({
        let friends = friends.clone();
        async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    SessionEvent::MessageReceived { peer, text } => {
                        println!("[{}] {}", short(&peer), text);
                    }
                    SessionEvent::PeerConnected { peer, remote_addr } => {
                        println!("* connected to {} at {}", short(&peer), remote_addr);
                    }
                    SessionEvent::PeerDisconnected { peer } => {
                        println!("* disconnected from {}", short(&peer));
                    }
                    SessionEvent::NewListenAddr { addr } => {
                        println!("* listening on {}", addr);
                    }
                    SessionEvent::PresenceUpdate { entries } => {
                        *friends.lock().await = entries;
                    }
                }
            }
        }
    });

    let mut online = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Commands: /connect <addr>, /select <name>, /online, /offline, /friends, /peers, /stats, /quit");
    println!("Anything else is sent as a chat message.\n");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match line.split_once(' ').map_or((line, ""), |(c, r)| (c, r.trim())) {
                    ("/quit", _) => break,
                    ("/connect", addr) => dial_address(&network, addr).await,
                    ("/select", name) => {
                        let entry = friends.lock().await.iter().find(|e| e.name == name).cloned();
                        match entry {
                            Some(entry) => select_entry(&network, &entry).await,
                            None => println!("no online peer named '{}'", name),
                        }
                    }
                    ("/online", _) => {
                        let Some(addr) = announced_addr(&network, local_peer_id).await else {
                            println!("no listen address available yet");
                            continue;
                        };
                        match directory.go_online(&addr).await {
                            Ok(()) => {
                                online = true;
                                println!("online as '{}' at {}", display_name, addr);
                            }
                            Err(e) => warn!("Going online failed: {}", e),
                        }
                    }
                    ("/offline", _) => match directory.go_offline().await {
                        Ok(()) => {
                            online = false;
                            println!("offline");
                        }
                        Err(e) => warn!("Going offline failed: {}", e),
                    },
                    ("/friends", _) => {
                        let list = friends.lock().await;
                        if list.is_empty() {
                            println!("nobody is online");
                        }
                        for entry in list.iter() {
                            println!("  {} -> {}", entry.name, entry.multiaddr);
                        }
                    }
                    ("/peers", _) => match network.connected_peers().await {
                        Ok(peers) => {
                            println!("{} peer(s) connected", peers.len());
                            for peer in peers {
                                println!("  {}", peer);
                            }
                        }
                        Err(e) => warn!("Peer listing failed: {}", e),
                    },
                    ("/stats", _) => match network.stats().await {
                        Ok(stats) => {
                            println!(
                                "{} connection(s) to {} peer(s)",
                                stats.connection_count, stats.peer_count
                            );
                            println!("  transports: {}", stats.transports);
                            for addr in stats.listen_addrs {
                                println!("  listening on {}", addr);
                            }
                        }
                        Err(e) => warn!("Stats query failed: {}", e),
                    },
                    _ => match network.send_message(line).await {
                        Ok(peer) => println!("[you -> {}] {}", short(&peer), line),
                        Err(e) => println!("send failed: {}", e),
                    },
                }
            }

            // An interrupt is the unexpected-teardown path: fire the bounded
            // beacon and exit without waiting on a full deregistration.
            _ = tokio::signal::ctrl_c() => {
                if online {
                    if let Some(addr) = announced_addr(&network, local_peer_id).await {
                        directory.notify_teardown(addr).await;
                    }
                }
                return Ok(());
            }
        }
    }

    // Explicit quit: deregister only, no beacon.
    if online {
        if let Err(e) = directory.go_offline().await {
            warn!("Going offline on shutdown failed: {}", e);
        }
    }

    Ok(())
}

/// Selecting a presence entry pins its peer id as the explicit target and
/// dials the advertised address.
async fn select_entry(network: &NetworkHandle, entry: &PresenceEntry) {
    if let Some(suffix) = presence::peer_id_suffix(&entry.multiaddr) {
        match PeerId::from_str(suffix) {
            Ok(peer) => {
                if let Err(e) = network.set_target(peer) {
                    warn!("Selecting target failed: {}", e);
                }
            }
            Err(e) => warn!("Presence entry for '{}' has a bad peer id: {}", entry.name, e),
        }
    }

    dial_address(network, &entry.multiaddr).await;
}

async fn dial_address(network: &NetworkHandle, addr: &str) {
    let parsed = match Multiaddr::from_str(addr) {
        Ok(addr) => addr,
        Err(e) => {
            println!("invalid multiaddress '{}': {}", addr, e);
            return;
        }
    };

    if let Err(e) = network.dial(parsed).await {
        println!("dial failed: {}", e);
    }
}

/// The address published to the directory: the first listen address with the
/// local peer id appended, so a selecting peer can recover the id from the
/// entry.
async fn announced_addr(network: &NetworkHandle, local_peer: PeerId) -> Option<String> {
    match network.listen_addrs().await {
        Ok(addrs) => addrs
            .first()
            .map(|addr| presence::published_addr(addr, &local_peer)),
        Err(e) => {
            warn!("Listen address lookup failed: {}", e);
            None
        }
    }
}

fn short(peer: &PeerId) -> String {
    let s = peer.to_string();
    s.chars().skip(s.len().saturating_sub(6)).collect()
}

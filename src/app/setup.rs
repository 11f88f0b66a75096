//! This module handles the initial setup of the application.
use super::args::AppArgs;
use anyhow::Result;
use libp2p::identity;
use std::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Contains everything the client loop needs to start.
pub struct PreparedApp {
    /// The command-line arguments.
    pub args: AppArgs,
    /// The port to listen on for P2P connections.
    pub port: u16,
    /// The node's keypair, generated fresh for each run.
    pub keypair: identity::Keypair,
    /// Display name published to the presence directory.
    pub display_name: String,
}

/// Prepares the application for running.
///
/// Picks a listen port, configures logging, prints the start banner and
/// generates the node identity.
///
/// # Errors
///
/// Returns an error if no free port can be found.
pub fn prepare(args: AppArgs) -> Result<PreparedApp> {
    let port = match args.port {
        Some(port) => port,
        None => find_free_port()?,
    };

    configure_logging();

    let keypair = identity::Keypair::generate_ed25519();
    let peer_id = keypair.public().to_peer_id();

    let display_name = args
        .name
        .clone()
        .unwrap_or_else(|| short_peer_name(&peer_id.to_string()));

    print_start_banner(&args, port, &peer_id.to_string(), &display_name);

    Ok(PreparedApp {
        args,
        port,
        keypair,
        display_name,
    })
}

/// Configures logging for the application.
fn configure_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,peerchat=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Prints a banner with startup information.
fn print_start_banner(args: &AppArgs, port: u16, peer_id: &str, display_name: &str) {
    println!("Starting peerchat node");
    println!("Peer ID: {}", peer_id);
    println!("Display name: {}", display_name);
    println!("Port: {}", port);
    println!("Presence directory: {}", args.directory);
    println!();
}

/// Default display name: a short prefix of the peer id.
fn short_peer_name(peer_id: &str) -> String {
    peer_id.chars().take(12).collect()
}

/// Finds a free TCP port on the local machine.
fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

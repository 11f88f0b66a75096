//! The main entry point for the peerchat node.
use anyhow::Result;

/// Launches the chat node with command-line arguments.
///
/// # Errors
///
/// Returns an error if the node fails to start or encounters a critical
/// error during execution.
#[tokio::main]
async fn main() -> Result<()> {
    peerchat::app::launch().await
}

//! The chat stream protocol: inbound read loops and the outbound send path.
//!
//! One protocol id covers both directions. Inbound streams are accepted
//! through the stream behaviour's control and each gets its own read task;
//! outbound sends open a fresh stream per message and write the encoded text
//! as a single unit.

use crate::codec::{self, Chunk};
use crate::types::SessionEvent;
use futures::{AsyncReadExt, AsyncWriteExt, StreamExt};
use libp2p::{PeerId, Stream, StreamProtocol};
use libp2p_stream::{Control, IncomingStreams};
use std::io;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Protocol id for chat streams, used for the inbound handler registration,
/// outbound stream opens, and peer capability checks.
pub const CHAT_PROTOCOL: &str = "/chat/1.0.0";

pub fn chat_protocol() -> StreamProtocol {
    StreamProtocol::new(CHAT_PROTOCOL)
}

/// Why an outbound message could not be delivered. Sends are never retried
/// automatically and never trigger a dial.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no deliverable connection")]
    NoTarget,
    #[error("failed to open chat stream: {0}")]
    OpenStream(String),
    #[error("failed to write message: {0}")]
    Write(#[from] io::Error),
    #[error("session layer is shut down")]
    Closed,
}

/// Accepts inbound chat streams for the lifetime of the node.
///
/// Each stream gets its own task so a stalled peer cannot hold up the
/// others; the loop ends when the behaviour (and with it the swarm) goes
/// away.
pub async fn run_inbound(mut streams: IncomingStreams, events: mpsc::UnboundedSender<SessionEvent>) {
    while let Some((peer, stream)) = streams.next().await {
        debug!(%peer, "accepted inbound chat stream");
        tokio::spawn(read_stream(peer, stream, events.clone()));
    }

    debug!("inbound chat stream acceptor ended");
}

/// Buffers one inbound stream to completion and decodes it as a single
/// message. The sender writes once and closes, and the transport carries no
/// frame boundaries, so only the peer's close marks the message as whole.
/// A read failure discards whatever arrived; chunks the codec drops are
/// skipped silently.
async fn read_stream(peer: PeerId, mut stream: Stream, events: mpsc::UnboundedSender<SessionEvent>) {
    let mut buf = Vec::new();

    if let Err(e) = stream.read_to_end(&mut buf).await {
        warn!(%peer, "chat stream read failed: {}", e);
        return;
    }
    debug!(%peer, "chat stream closed by peer");

    if let Some(text) = codec::decode(Chunk::Bytes(buf)) {
        let _ = events.send(SessionEvent::MessageReceived { peer, text });
    }
}

/// Opens a new chat stream to `peer` and writes one encoded message.
///
/// The stream is closed right after the write; replies come in on the
/// peer's own outbound streams. Failures carry whatever diagnostic the
/// stack reported and are surfaced to the caller unretried.
pub async fn send_message(control: &mut Control, peer: PeerId, text: &str) -> Result<(), DeliveryError> {
    let mut stream = control
        .open_stream(peer, chat_protocol())
        .await
        .map_err(|e| DeliveryError::OpenStream(e.to_string()))?;

    stream.write_all(&codec::encode(text)).await?;
    stream.close().await?;

    debug!(%peer, "message delivered");
    Ok(())
}

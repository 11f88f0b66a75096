//! Client for the shared presence directory.
//!
//! The directory is a small external HTTP registry mapping display names to
//! current multiaddresses for peers marked online. This module only reads
//! the list and writes/deletes the local node's own entry; the registry's
//! storage belongs to whoever runs it.

use crate::types::{PresenceEntry, SessionEvent};
use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How often the online list is refreshed.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-request timeout against the directory.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on how long a teardown notification may delay shutdown.
const TEARDOWN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("directory returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// HTTP client for the `/api/online` surface.
#[derive(Clone)]
pub struct DirectoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl DirectoryClient {
    /// Creates a client against `base_url` (scheme and host, no trailing
    /// path).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/online", self.base_url)
    }

    /// Fetches the full list of currently online peers.
    pub async fn fetch_online(&self) -> Result<Vec<PresenceEntry>, DirectoryError> {
        let response = self.http.get(self.endpoint()).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Registers the local node as online under `multiaddr`.
    ///
    /// On failure the caller's online state must stay unchanged; there is no
    /// retry.
    pub async fn go_online(&self, multiaddr: &str) -> Result<(), DirectoryError> {
        let response = self
            .http
            .post(self.endpoint())
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(multiaddr.to_owned())
            .send()
            .await?;
        check_status(response).await?;

        debug!("registered online as {}", multiaddr);
        Ok(())
    }

    /// Removes the local node's directory entry.
    pub async fn go_offline(&self) -> Result<(), DirectoryError> {
        let response = self.http.delete(self.endpoint()).send().await?;
        check_status(response).await?;

        debug!("deregistered from presence directory");
        Ok(())
    }

    /// Best-effort notification on teardown, carrying the local
    /// multiaddress. Fire-and-forget with a short bound; no delivery
    /// guarantee and no error surfaced.
    pub async fn notify_teardown(&self, multiaddr: String) {
        let result = tokio::time::timeout(TEARDOWN_TIMEOUT, self.go_online(&multiaddr)).await;
        if !matches!(result, Ok(Ok(()))) {
            debug!("teardown notification did not complete");
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(DirectoryError::Rejected { status, body })
}

/// Polls the directory on a fixed period and forwards each snapshot as a
/// session event. Fetch failures are logged and the next tick tries again;
/// the poller ends when nobody is listening anymore.
pub async fn run_poller(client: DirectoryClient, events: mpsc::UnboundedSender<SessionEvent>) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        ticker.tick().await;

        match client.fetch_online().await {
            Ok(entries) => {
                if events
                    .send(SessionEvent::PresenceUpdate { entries })
                    .is_err()
                {
                    debug!("presence consumer gone, stopping poller");
                    break;
                }
            }
            Err(e) => {
                warn!("Presence refresh failed: {}", e);
            }
        }
    }
}

/// The form of the local address published to the directory: the listen
/// address with the local peer id appended. Listen addresses come out of the
/// swarm without a `/p2p/` component, and whoever selects the entry needs
/// one to recover the peer id via [`peer_id_suffix`].
pub fn published_addr(addr: &Multiaddr, peer: &PeerId) -> String {
    addr.clone().with(Protocol::P2p(*peer)).to_string()
}

/// Extracts the peer identifier suffix from a multiaddress: the segment
/// after the last `/p2p/` marker, if any.
pub fn peer_id_suffix(multiaddr: &str) -> Option<&str> {
    let idx = multiaddr.rfind("/p2p/")?;
    let suffix = &multiaddr[idx + "/p2p/".len()..];
    if suffix.is_empty() {
        None
    } else {
        Some(suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_peer_id_suffix() {
        let addr = "/ip4/192.0.2.1/tcp/4001/p2p/12D3KooWQYV9dGMFoRzNStwpXztXaBUjtPqi6aU76ZgUriHhKust";
        assert_eq!(
            peer_id_suffix(addr),
            Some("12D3KooWQYV9dGMFoRzNStwpXztXaBUjtPqi6aU76ZgUriHhKust")
        );
    }

    #[test]
    fn takes_the_last_p2p_marker() {
        let addr = "/dns4/relay.example.com/tcp/443/wss/p2p/RelayPeer/p2p-circuit/p2p/TargetPeer";
        assert_eq!(peer_id_suffix(addr), Some("TargetPeer"));
    }

    #[test]
    fn missing_or_empty_marker_yields_none() {
        assert_eq!(peer_id_suffix("/ip4/127.0.0.1/tcp/4001"), None);
        assert_eq!(peer_id_suffix("/ip4/127.0.0.1/tcp/4001/p2p/"), None);
    }

    #[test]
    fn published_addr_round_trips_the_peer_id() {
        let peer = PeerId::random();
        let listen: Multiaddr = "/ip4/192.0.2.1/tcp/4001".parse().unwrap();

        let published = published_addr(&listen, &peer);
        let id = peer.to_string();
        assert_eq!(peer_id_suffix(&published), Some(id.as_str()));
    }

    #[tokio::test]
    async fn teardown_notification_is_bounded_and_silent() {
        // Nothing listens on the discard port; the notification must still
        // return promptly and without surfacing an error.
        let client = DirectoryClient::new("http://127.0.0.1:9").unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            client.notify_teardown("/ip4/127.0.0.1/tcp/1".to_owned()),
        )
        .await
        .unwrap();
    }

    #[test]
    fn presence_entry_uses_registry_field_names() {
        let json = r#"[{"name":"alice","multiaddr":"/ip4/127.0.0.1/tcp/1/ws"}]"#;
        let entries: Vec<PresenceEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(
            entries,
            vec![PresenceEntry {
                name: "alice".to_owned(),
                multiaddr: "/ip4/127.0.0.1/tcp/1/ws".to_owned(),
            }]
        );
    }
}

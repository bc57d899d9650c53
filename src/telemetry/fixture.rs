use super::{PeerTelemetry, PeerTelemetrySource};
use crate::config::FixturePeer;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;

enum Reply {
    Peers(Vec<FixturePeer>),
    Unavailable(String),
}

/// Serves a fixed peer list, for demos and tests
pub struct FixtureSource {
    reply: Reply,
}

impl FixtureSource {
    pub fn from_config(peers: &[FixturePeer]) -> Self {
        Self {
            reply: Reply::Peers(peers.to_vec()),
        }
    }

    /// A source whose every poll fails
    pub fn unavailable(message: &str) -> Self {
        Self {
            reply: Reply::Unavailable(message.to_string()),
        }
    }
}

#[async_trait]
impl PeerTelemetrySource for FixtureSource {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_peers(&self) -> Result<Vec<PeerTelemetry>> {
        let peers = match &self.reply {
            Reply::Peers(peers) => peers,
            Reply::Unavailable(message) => {
                return Err(Error::Telemetry(message.clone()).into());
            }
        };

        let now = crate::db::now();
        Ok(peers
            .iter()
            .map(|peer| PeerTelemetry {
                public_key: peer.public_key.clone(),
                endpoint: peer.endpoint.clone(),
                last_handshake: peer
                    .handshake_secs_ago
                    .map(|secs| now - Duration::seconds(secs)),
                bytes_received: peer.bytes_received,
                bytes_sent: peer.bytes_sent,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshakes_are_relative_to_the_poll() {
        let source = FixtureSource::from_config(&[FixturePeer {
            public_key: "a2V5LWE=".to_string(),
            endpoint: None,
            handshake_secs_ago: Some(90),
            bytes_received: 10,
            bytes_sent: 20,
        }]);

        let before = crate::db::now();
        let peers = source.fetch_peers().await.unwrap();
        let handshake = peers[0].last_handshake.unwrap();
        assert!(handshake <= before - Duration::seconds(89));
        assert!(handshake >= before - Duration::seconds(91));
    }

    #[tokio::test]
    async fn unavailable_source_fails() {
        let err = FixtureSource::unavailable("interface down")
            .fetch_peers()
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Telemetry(_))));
    }
}

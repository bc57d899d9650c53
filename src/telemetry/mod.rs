use crate::config::{TelemetryConfig, TelemetrySourceKind};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub mod fixture;
pub mod wg_show;

pub use fixture::FixtureSource;
pub use wg_show::WgShowSource;

/// Live state of one peer as reported by the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerTelemetry {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub last_handshake: Option<DateTime<Utc>>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Anything that can report current peer telemetry
#[async_trait]
pub trait PeerTelemetrySource: Send + Sync {
    /// Short name used in logs and security events
    fn name(&self) -> &'static str;

    /// Fetch the current state of every peer on the interface
    async fn fetch_peers(&self) -> Result<Vec<PeerTelemetry>>;
}

/// Select the telemetry source named in configuration
pub fn build_source(config: &TelemetryConfig) -> Arc<dyn PeerTelemetrySource> {
    match config.source {
        TelemetrySourceKind::WgShow => Arc::new(WgShowSource::new(
            config.wg_binary.clone(),
            config.interface.clone(),
        )),
        TelemetrySourceKind::Fixture => Arc::new(FixtureSource::from_config(&config.fixture_peers)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_follows_configuration() {
        let mut config = TelemetryConfig::default();
        assert_eq!(build_source(&config).name(), "wg_show");

        config.source = TelemetrySourceKind::Fixture;
        assert_eq!(build_source(&config).name(), "fixture");
    }
}

use super::{PeerTelemetry, PeerTelemetrySource};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, warn};

/// Reads peers from `wg show <interface> dump`
pub struct WgShowSource {
    binary: String,
    interface: String,
}

impl WgShowSource {
    pub fn new(binary: String, interface: String) -> Self {
        Self { binary, interface }
    }
}

#[async_trait]
impl PeerTelemetrySource for WgShowSource {
    fn name(&self) -> &'static str {
        "wg_show"
    }

    async fn fetch_peers(&self) -> Result<Vec<PeerTelemetry>> {
        debug!("Running {} show {} dump", self.binary, self.interface);

        let output = Command::new(&self.binary)
            .args(["show", &self.interface, "dump"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Telemetry(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Telemetry(format!(
                "{} show {} dump exited with {}: {}",
                self.binary,
                self.interface,
                output.status,
                stderr.trim()
            ))
            .into());
        }

        parse_dump(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the tab-separated output of `wg show <interface> dump` or `wg show all dump`.
///
/// Interface lines are skipped. Peer lines carry, in order: public key,
/// preshared key, endpoint, allowed IPs, latest handshake (epoch seconds),
/// rx bytes, tx bytes, persistent keepalive; `all dump` prefixes each line
/// with the interface name. Only the fields the tunnel changes at runtime
/// are kept.
pub fn parse_dump(output: &str) -> Result<Vec<PeerTelemetry>> {
    let mut peers = Vec::new();

    for (index, line) in output.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        let peer_fields = match fields.len() {
            4 | 5 => continue,
            8 => &fields[..],
            9 => &fields[1..],
            n => {
                warn!("Skipping wg dump line {} with {} fields", index + 1, n);
                continue;
            }
        };

        peers.push(parse_peer_line(peer_fields, index + 1)?);
    }

    Ok(peers)
}

fn parse_peer_line(fields: &[&str], line_no: usize) -> Result<PeerTelemetry> {
    let number = |value: &str, what: &str| -> Result<u64> {
        value.parse::<u64>().map_err(|_| {
            Error::Telemetry(format!("Invalid {} '{}' on wg dump line {}", what, value, line_no))
                .into()
        })
    };

    let endpoint = match fields[2] {
        "(none)" | "" => None,
        endpoint => Some(endpoint.to_string()),
    };

    let handshake_secs = number(fields[4], "handshake")?;
    let last_handshake = if handshake_secs == 0 {
        None
    } else {
        let secs = i64::try_from(handshake_secs).map_err(|_| {
            Error::Telemetry(format!("Handshake out of range on wg dump line {}", line_no))
        })?;
        Some(DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
            Error::Telemetry(format!("Handshake out of range on wg dump line {}", line_no))
        })?)
    };

    Ok(PeerTelemetry {
        public_key: fields[0].to_string(),
        endpoint,
        last_handshake,
        bytes_received: number(fields[5], "rx bytes")?,
        bytes_sent: number(fields[6], "tx bytes")?,
    })
}

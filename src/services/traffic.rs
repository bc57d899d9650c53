use crate::db::models::peer_models::Peer;
use crate::error::Error;
use crate::services::peer_status::{PeerStatus, StatusThresholds};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Render a byte count with binary units.
///
/// Plain bytes are printed as an integer, every larger unit with two decimals.
/// Anything beyond the last unit stays in TB.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}

/// Convert a stored counter, refusing negative values
pub fn byte_count(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        Error::Validation(format!("Byte counter cannot be negative: {}", value)).into()
    })
}

/// Traffic totals for one peer
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PeerTraffic {
    pub peer_id: Uuid,
    pub name: String,
    pub received: u64,
    pub sent: u64,
    pub total: u64,
}

/// Traffic across every peer
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TrafficSummary {
    pub peer_count: usize,
    pub total_received: u64,
    pub total_sent: u64,
    pub total: u64,
    pub average_per_peer: u64,
    pub total_received_formatted: String,
    pub total_sent_formatted: String,
    pub total_formatted: String,
    pub average_per_peer_formatted: String,
    pub per_peer: Vec<PeerTraffic>,
}

/// Sum traffic over `peers`; any negative counter fails the whole summary
pub fn aggregate(peers: &[Peer]) -> Result<TrafficSummary> {
    let mut per_peer = Vec::with_capacity(peers.len());
    let (mut total_received, mut total_sent) = (0u64, 0u64);

    for peer in peers {
        let received = byte_count(peer.bytes_received)?;
        let sent = byte_count(peer.bytes_sent)?;
        total_received = total_received.saturating_add(received);
        total_sent = total_sent.saturating_add(sent);
        per_peer.push(PeerTraffic {
            peer_id: peer.id,
            name: peer.name.clone(),
            received,
            sent,
            total: received.saturating_add(sent),
        });
    }

    let total = total_received.saturating_add(total_sent);
    let average_per_peer = if peers.is_empty() {
        0
    } else {
        total / peers.len() as u64
    };

    Ok(TrafficSummary {
        peer_count: peers.len(),
        total_received,
        total_sent,
        total,
        average_per_peer,
        total_received_formatted: format_bytes(total_received),
        total_sent_formatted: format_bytes(total_sent),
        total_formatted: format_bytes(total),
        average_per_peer_formatted: format_bytes(average_per_peer),
        per_peer,
    })
}

/// How many stored peers are switched on
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PeerCounts {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
}

pub fn peer_counts(peers: &[Peer]) -> PeerCounts {
    let enabled = peers.iter().filter(|peer| peer.enabled).count();
    PeerCounts {
        total: peers.len(),
        enabled,
        disabled: peers.len() - enabled,
    }
}

/// Peer count and traffic for one derived status
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusBucket {
    pub status: PeerStatus,
    pub count: usize,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub total_formatted: String,
}

/// Group peers by derived status; every status is present, possibly empty
pub fn status_breakdown(
    peers: &[Peer],
    thresholds: &StatusThresholds,
    now: DateTime<Utc>,
) -> Result<Vec<StatusBucket>> {
    let mut buckets: Vec<StatusBucket> = PeerStatus::ALL
        .iter()
        .map(|status| StatusBucket {
            status: *status,
            count: 0,
            bytes_received: 0,
            bytes_sent: 0,
            total_formatted: String::new(),
        })
        .collect();

    for peer in peers {
        let status = thresholds.derive(peer.last_handshake, now);
        let received = byte_count(peer.bytes_received)?;
        let sent = byte_count(peer.bytes_sent)?;
        if let Some(bucket) = buckets.iter_mut().find(|b| b.status == status) {
            bucket.count += 1;
            bucket.bytes_received = bucket.bytes_received.saturating_add(received);
            bucket.bytes_sent = bucket.bytes_sent.saturating_add(sent);
        }
    }

    for bucket in &mut buckets {
        bucket.total_formatted = format_bytes(bucket.bytes_received.saturating_add(bucket.bytes_sent));
    }

    Ok(buckets)
}

use crate::config::PeersConfig;
use crate::db::models::peer_models::{CreatePeerRequest, Peer, UpdatePeerRequest};
use crate::db::repositories::peers::{PeersRepository, TelemetryUpdate};
use crate::error::Error;
use crate::security::validation;
use crate::services::peer_status::{relative_last_seen, PeerStatus, StatusThresholds};
use crate::services::traffic::{self, PeerCounts, StatusBucket, TrafficSummary};
use crate::telemetry::PeerTelemetrySource;
use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

/// A stored peer with its derived, per-read fields
#[derive(Debug, Clone, Serialize)]
pub struct PeerView {
    #[serde(flatten)]
    pub peer: Peer,
    pub status: PeerStatus,
    pub last_seen: String,
    pub bytes_received_formatted: String,
    pub bytes_sent_formatted: String,
    pub total_formatted: String,
}

/// Everything the peer list page needs
#[derive(Debug, Clone, Serialize)]
pub struct PeerListing {
    pub peers: Vec<PeerView>,
    pub statistics: Vec<StatusBucket>,
    pub summary: TrafficSummary,
}

/// Traffic figures without the peer list
#[derive(Debug, Clone, Serialize)]
pub struct PeerStats {
    pub peers: PeerCounts,
    pub summary: TrafficSummary,
    pub statistics: Vec<StatusBucket>,
    pub generated_at: DateTime<Utc>,
}

/// WireGuard client configuration ready for download
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub filename: String,
    pub config: String,
}

/// IPv4 tunnel network peers are allocated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelNetwork {
    base: u32,
    prefix: u8,
}

impl TunnelNetwork {
    pub fn parse(cidr: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("Invalid tunnel network '{}'", cidr));

        let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
        let address: Ipv4Addr = address.trim().parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
        if !(8..=30).contains(&prefix) {
            return Err(Error::Config(format!(
                "Tunnel network prefix must be between /8 and /30, got /{}",
                prefix
            ))
            .into());
        }

        let mask = u32::MAX << (32 - prefix);
        Ok(Self {
            base: u32::from(address) & mask,
            prefix,
        })
    }

    fn broadcast(&self) -> u32 {
        self.base | (u32::MAX >> self.prefix)
    }

    /// Whether `address` is a usable host address inside the network
    pub fn is_host(&self, address: Ipv4Addr) -> bool {
        let value = u32::from(address);
        value > self.base && value < self.broadcast()
    }

    /// Host addresses in order; the first one belongs to the server
    fn peer_hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        (self.base + 2..self.broadcast()).map(Ipv4Addr::from)
    }

    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base + 1)
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

/// Peer manager: telemetry sync, presentation and provisioning
pub struct PeerManager {
    peers_repo: PeersRepository,
    telemetry: Arc<dyn PeerTelemetrySource>,
    thresholds: StatusThresholds,
    network: TunnelNetwork,
    config: PeersConfig,
}

impl PeerManager {
    /// Create a new peer manager
    pub fn new(
        pool: Arc<SqlitePool>,
        telemetry: Arc<dyn PeerTelemetrySource>,
        config: &PeersConfig,
    ) -> Result<Self> {
        Ok(Self {
            peers_repo: PeersRepository::new(pool),
            telemetry,
            thresholds: StatusThresholds::from(config),
            network: TunnelNetwork::parse(&config.network_cidr)?,
            config: config.clone(),
        })
    }

    pub fn telemetry_source(&self) -> &'static str {
        self.telemetry.name()
    }

    /// Poll the telemetry source and store the latest counters; returns how many peers matched
    pub async fn sync_telemetry(&self) -> Result<usize> {
        let reported = self.telemetry.fetch_peers().await?;
        let mut matched = 0;

        for peer in &reported {
            let counter = |value: u64| {
                i64::try_from(value).map_err(|_| {
                    Error::Telemetry(format!("Counter out of range for {}", peer.public_key))
                })
            };

            let applied = self
                .peers_repo
                .apply_telemetry(&TelemetryUpdate {
                    public_key: &peer.public_key,
                    endpoint: peer.endpoint.as_deref(),
                    last_handshake: peer.last_handshake.map(crate::db::stored),
                    bytes_received: counter(peer.bytes_received)?,
                    bytes_sent: counter(peer.bytes_sent)?,
                })
                .await?;
            if applied {
                matched += 1;
            }
        }

        debug!(
            "Telemetry from {}: {} reported, {} matched",
            self.telemetry.name(),
            reported.len(),
            matched
        );

        Ok(matched)
    }

    pub fn view(&self, peer: Peer, now: DateTime<Utc>) -> Result<PeerView> {
        let received = traffic::byte_count(peer.bytes_received)?;
        let sent = traffic::byte_count(peer.bytes_sent)?;

        Ok(PeerView {
            status: self.thresholds.derive(peer.last_handshake, now),
            last_seen: relative_last_seen(peer.last_handshake, now),
            bytes_received_formatted: traffic::format_bytes(received),
            bytes_sent_formatted: traffic::format_bytes(sent),
            total_formatted: traffic::format_bytes(received.saturating_add(sent)),
            peer,
        })
    }

    /// Sync telemetry, then render every stored peer
    pub async fn list(&self, now: DateTime<Utc>) -> Result<PeerListing> {
        self.sync_telemetry().await?;

        let peers = self.peers_repo.get_all().await?;
        let statistics = traffic::status_breakdown(&peers, &self.thresholds, now)?;
        let summary = traffic::aggregate(&peers)?;
        let peers = peers
            .into_iter()
            .map(|peer| self.view(peer, now))
            .collect::<Result<Vec<_>>>()?;

        Ok(PeerListing {
            peers,
            statistics,
            summary,
        })
    }

    /// Traffic summary and status breakdown from stored counters
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<PeerStats> {
        let peers = self.peers_repo.get_all().await?;

        Ok(PeerStats {
            peers: traffic::peer_counts(&peers),
            summary: traffic::aggregate(&peers)?,
            statistics: traffic::status_breakdown(&peers, &self.thresholds, now)?,
            generated_at: now,
        })
    }

    pub async fn get(&self, id: &Uuid) -> Result<Peer> {
        let peer = self
            .peers_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Peer not found: {}", id)))?;

        Ok(peer)
    }

    pub async fn get_view(&self, id: &Uuid, now: DateTime<Utc>) -> Result<PeerView> {
        let peer = self.get(id).await?;
        self.view(peer, now)
    }

    /// Provision a new peer with a fresh key pair
    pub async fn provision(&self, request: &CreatePeerRequest) -> Result<Peer> {
        let name = validation::validate_peer_name(&request.name)?;
        let persistent_keepalive = validation::validate_keepalive(
            request
                .persistent_keepalive
                .unwrap_or(self.config.default_keepalive),
        )?;

        let used = self.peers_repo.used_addresses().await?;
        let address = match &request.address {
            Some(address) => self.check_address(address, &used)?,
            None => self.allocate_address(&used)?,
        };

        let allowed_ips = match request.allowed_ips.as_deref().map(str::trim) {
            Some(ips) if !ips.is_empty() => ips.to_string(),
            _ => format!("{}/32", address),
        };

        let (private_key, public_key) = generate_keypair();
        let now = crate::db::now();
        let peer = Peer {
            id: Uuid::new_v4(),
            name,
            public_key,
            private_key,
            address: address.to_string(),
            allowed_ips,
            endpoint: None,
            persistent_keepalive,
            bytes_received: 0,
            bytes_sent: 0,
            last_handshake: None,
            enabled: request.enabled,
            user_id: request.user_id,
            created_at: now,
            updated_at: now,
        };

        let created = self.peers_repo.create(&peer).await?;
        info!("Provisioned peer {} at {}", created.name, created.address);

        Ok(created)
    }

    fn check_address(&self, address: &str, used: &[String]) -> Result<Ipv4Addr> {
        let parsed: Ipv4Addr = address
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid tunnel address '{}'", address)))?;

        if !self.network.is_host(parsed) || parsed == self.network.server_address() {
            return Err(Error::Validation(format!(
                "Address {} is not a peer address in {}",
                parsed, self.config.network_cidr
            ))
            .into());
        }
        if used.iter().any(|u| u == &parsed.to_string()) {
            return Err(Error::Constraint(format!("Address {} is already assigned", parsed)).into());
        }

        Ok(parsed)
    }

    fn allocate_address(&self, used: &[String]) -> Result<Ipv4Addr> {
        self.network
            .peer_hosts()
            .find(|candidate| !used.iter().any(|u| u == &candidate.to_string()))
            .ok_or_else(|| {
                Error::Constraint(format!(
                    "No free addresses left in {}",
                    self.config.network_cidr
                ))
                .into()
            })
    }

    /// Apply an admin edit
    pub async fn update(&self, id: &Uuid, request: &UpdatePeerRequest) -> Result<Peer> {
        if request.is_empty() {
            return Err(Error::Validation("No changes supplied".to_string()).into());
        }

        let mut changes = request.clone();
        if let Some(name) = &request.name {
            let name = validation::validate_peer_name(name)?;
            if let Some(existing) = self.peers_repo.get_by_name(&name).await? {
                if existing.id != *id {
                    return Err(Error::Constraint(format!(
                        "A peer named '{}' already exists",
                        name
                    ))
                    .into());
                }
            }
            changes.name = Some(name);
        }
        if let Some(keepalive) = request.persistent_keepalive {
            changes.persistent_keepalive = Some(validation::validate_keepalive(keepalive)?);
        }
        if let Some(ips) = &request.allowed_ips {
            if ips.trim().is_empty() {
                return Err(Error::Validation("Allowed IPs cannot be empty".to_string()).into());
            }
            changes.allowed_ips = Some(ips.trim().to_string());
        }

        self.peers_repo.update(id, &changes).await
    }

    /// Revoke a peer
    pub async fn delete(&self, id: &Uuid) -> Result<Peer> {
        let peer = self.get(id).await?;
        if !self.peers_repo.delete(id).await? {
            return Err(Error::NotFound(format!("Peer not found: {}", id)).into());
        }

        info!("Deleted peer {} ({})", peer.name, peer.address);

        Ok(peer)
    }

    /// Render the WireGuard client configuration for a peer
    pub async fn client_config(&self, id: &Uuid) -> Result<ClientConfig> {
        let server_public_key = self.config.server_public_key.as_deref().ok_or_else(|| {
            Error::Config("peers.server_public_key is not configured".to_string())
        })?;
        let peer = self.get(id).await?;

        let mut config = format!(
            "[Interface]\n\
             PrivateKey = {}\n\
             Address = {}/{}\n\
             DNS = {}\n\
             \n\
             [Peer]\n\
             PublicKey = {}\n\
             Endpoint = {}\n\
             AllowedIPs = 0.0.0.0/0\n",
            peer.private_key,
            peer.address,
            self.network.prefix(),
            self.config.dns,
            server_public_key,
            self.config.server_endpoint,
        );
        if peer.persistent_keepalive > 0 {
            config.push_str(&format!("PersistentKeepalive = {}\n", peer.persistent_keepalive));
        }

        let stem: String = peer
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        Ok(ClientConfig {
            filename: format!("{}.conf", stem),
            config,
        })
    }
}

/// Fresh X25519 key pair as (private, public), base64 encoded
pub fn generate_keypair() -> (String, String) {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);

    (
        general_purpose::STANDARD.encode(secret.to_bytes()),
        general_purpose::STANDARD.encode(public.as_bytes()),
    )
}

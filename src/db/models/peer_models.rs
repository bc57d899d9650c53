use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provisioned WireGuard peer
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Peer {
    pub id: Uuid,
    pub name: String,
    pub public_key: String,
    #[serde(skip_serializing, default)]
    pub private_key: String,
    pub address: String,
    pub allowed_ips: String,
    pub endpoint: Option<String>,
    pub persistent_keepalive: i64,
    pub bytes_received: i64,
    pub bytes_sent: i64,
    pub last_handshake: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin request to provision a peer
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePeerRequest {
    pub name: String,
    /// Tunnel address; the next free one is allocated when absent
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub allowed_ips: Option<String>,
    #[serde(default)]
    pub persistent_keepalive: Option<i64>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Admin request to edit a peer; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePeerRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub allowed_ips: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub persistent_keepalive: Option<i64>,
}

impl UpdatePeerRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.enabled.is_none()
            && self.allowed_ips.is_none()
            && self.endpoint.is_none()
            && self.persistent_keepalive.is_none()
    }
}

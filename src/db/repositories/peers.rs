use crate::{
    db::models::peer_models::{Peer, UpdatePeerRequest},
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Live counters reported for one public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryUpdate<'a> {
    pub public_key: &'a str,
    pub endpoint: Option<&'a str>,
    pub last_handshake: Option<DateTime<Utc>>,
    pub bytes_received: i64,
    pub bytes_sent: i64,
}

/// Peers repository for handling WireGuard peer operations
#[derive(Clone)]
pub struct PeersRepository {
    pool: Arc<SqlitePool>,
}

fn write_error(context: &str, err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return Error::Constraint(
                "A peer with that name, public key or address already exists".to_string(),
            );
        }
        if db_err.is_foreign_key_violation() {
            return Error::Validation("Owner user does not exist".to_string());
        }
    }
    Error::Database(format!("{}: {}", context, err))
}

impl PeersRepository {
    /// Create a new peers repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Create a new peer
    pub async fn create(&self, peer: &Peer) -> Result<Peer> {
        info!("Creating peer: {} ({})", peer.name, peer.address);

        let result = sqlx::query_as::<_, Peer>(
            r#"
            INSERT INTO peers (id, name, public_key, private_key, address, allowed_ips, endpoint,
                               persistent_keepalive, bytes_received, bytes_sent, last_handshake,
                               enabled, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, name, public_key, private_key, address, allowed_ips, endpoint,
                      persistent_keepalive, bytes_received, bytes_sent, last_handshake,
                      enabled, user_id, created_at, updated_at
            "#,
        )
        .bind(peer.id)
        .bind(&peer.name)
        .bind(&peer.public_key)
        .bind(&peer.private_key)
        .bind(&peer.address)
        .bind(&peer.allowed_ips)
        .bind(&peer.endpoint)
        .bind(peer.persistent_keepalive)
        .bind(peer.bytes_received)
        .bind(peer.bytes_sent)
        .bind(peer.last_handshake)
        .bind(peer.enabled)
        .bind(peer.user_id)
        .bind(peer.created_at)
        .bind(peer.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| write_error("Failed to create peer", e))?;

        Ok(result)
    }

    /// Get peer by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Peer>> {
        let result = sqlx::query_as::<_, Peer>(
            r#"
            SELECT id, name, public_key, private_key, address, allowed_ips, endpoint,
                   persistent_keepalive, bytes_received, bytes_sent, last_handshake,
                   enabled, user_id, created_at, updated_at
            FROM peers
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get peer by ID: {}", e)))?;

        Ok(result)
    }

    /// Get peer by name
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Peer>> {
        let result = sqlx::query_as::<_, Peer>(
            r#"
            SELECT id, name, public_key, private_key, address, allowed_ips, endpoint,
                   persistent_keepalive, bytes_received, bytes_sent, last_handshake,
                   enabled, user_id, created_at, updated_at
            FROM peers
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get peer by name: {}", e)))?;

        Ok(result)
    }

    /// Get all peers ordered by name
    pub async fn get_all(&self) -> Result<Vec<Peer>> {
        let result = sqlx::query_as::<_, Peer>(
            r#"
            SELECT id, name, public_key, private_key, address, allowed_ips, endpoint,
                   persistent_keepalive, bytes_received, bytes_sent, last_handshake,
                   enabled, user_id, created_at, updated_at
            FROM peers
            ORDER BY name
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get all peers: {}", e)))?;

        Ok(result)
    }

    /// Tunnel addresses already handed out
    pub async fn used_addresses(&self) -> Result<Vec<String>> {
        let result = sqlx::query_scalar::<_, String>("SELECT address FROM peers")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to list peer addresses: {}", e)))?;

        Ok(result)
    }

    /// Apply an admin edit; absent fields keep their stored value
    pub async fn update(&self, id: &Uuid, changes: &UpdatePeerRequest) -> Result<Peer> {
        let result = sqlx::query_as::<_, Peer>(
            r#"
            UPDATE peers
            SET name = COALESCE(?, name),
                enabled = COALESCE(?, enabled),
                allowed_ips = COALESCE(?, allowed_ips),
                endpoint = COALESCE(?, endpoint),
                persistent_keepalive = COALESCE(?, persistent_keepalive),
                updated_at = ?
            WHERE id = ?
            RETURNING id, name, public_key, private_key, address, allowed_ips, endpoint,
                      persistent_keepalive, bytes_received, bytes_sent, last_handshake,
                      enabled, user_id, created_at, updated_at
            "#,
        )
        .bind(&changes.name)
        .bind(changes.enabled)
        .bind(&changes.allowed_ips)
        .bind(&changes.endpoint)
        .bind(changes.persistent_keepalive)
        .bind(crate::db::now())
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| write_error("Failed to update peer", e))?;

        result.ok_or_else(|| Error::NotFound(format!("Peer not found: {}", id)).into())
    }

    /// Store the latest telemetry for a peer; returns false for unknown keys
    pub async fn apply_telemetry(&self, update: &TelemetryUpdate<'_>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE peers
            SET endpoint = COALESCE(?, endpoint),
                last_handshake = ?,
                bytes_received = ?,
                bytes_sent = ?,
                updated_at = ?
            WHERE public_key = ?
            "#,
        )
        .bind(update.endpoint)
        .bind(update.last_handshake)
        .bind(update.bytes_received)
        .bind(update.bytes_sent)
        .bind(crate::db::now())
        .bind(update.public_key)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to apply peer telemetry: {}", e)))?;

        if result.rows_affected() == 0 {
            debug!("Telemetry for unknown public key {}", update.public_key);
        }

        Ok(result.rows_affected() > 0)
    }

    /// Delete a peer
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM peers WHERE id = ?")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete peer: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn peer(name: &str, key: &str, address: &str) -> Peer {
        let now = crate::db::now();
        Peer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            public_key: key.to_string(),
            private_key: format!("{}-private", key),
            address: address.to_string(),
            allowed_ips: format!("{}/32", address),
            endpoint: None,
            persistent_keepalive: 25,
            bytes_received: 0,
            bytes_sent: 0,
            last_handshake: None,
            enabled: true,
            user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn telemetry_is_applied_by_public_key() {
        let repo = PeersRepository::new(test_pool().await);
        let laptop = repo.create(&peer("laptop", "key-a", "10.8.0.2")).await.unwrap();
        let seen = crate::db::now();

        let applied = repo
            .apply_telemetry(&TelemetryUpdate {
                public_key: "key-a",
                endpoint: Some("203.0.113.5:51820"),
                last_handshake: Some(seen),
                bytes_received: 2048,
                bytes_sent: 4096,
            })
            .await
            .unwrap();
        assert!(applied);

        let unknown = repo
            .apply_telemetry(&TelemetryUpdate {
                public_key: "key-unknown",
                endpoint: None,
                last_handshake: None,
                bytes_received: 1,
                bytes_sent: 1,
            })
            .await
            .unwrap();
        assert!(!unknown);

        let stored = repo.get_by_id(&laptop.id).await.unwrap().unwrap();
        assert_eq!(stored.bytes_received, 2048);
        assert_eq!(stored.bytes_sent, 4096);
        assert_eq!(stored.last_handshake, Some(seen));
        assert_eq!(stored.endpoint.as_deref(), Some("203.0.113.5:51820"));
    }

    #[tokio::test]
    async fn duplicate_address_is_a_constraint_error() {
        let repo = PeersRepository::new(test_pool().await);
        repo.create(&peer("one", "key-1", "10.8.0.2")).await.unwrap();

        let err = repo.create(&peer("two", "key-2", "10.8.0.2")).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Constraint(_))));
        assert_eq!(repo.used_addresses().await.unwrap(), vec!["10.8.0.2".to_string()]);
    }

    #[tokio::test]
    async fn update_keeps_absent_fields() {
        let repo = PeersRepository::new(test_pool().await);
        let phone = repo.create(&peer("phone", "key-p", "10.8.0.3")).await.unwrap();

        let updated = repo
            .update(
                &phone.id,
                &UpdatePeerRequest {
                    enabled: Some(false),
                    ..UpdatePeerRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.name, "phone");
        assert_eq!(updated.allowed_ips, "10.8.0.3/32");

        let missing = repo
            .update(&Uuid::new_v4(), &UpdatePeerRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(missing.downcast_ref::<Error>(), Some(Error::NotFound(_))));

        assert!(repo.delete(&phone.id).await.unwrap());
        assert!(!repo.delete(&phone.id).await.unwrap());
    }
}

use crate::{
    db::models::security_event_models::{NewSecurityEvent, SecurityEvent, SecurityEventQuery},
    error::Error,
};
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// Append-only store for security events: rows are inserted and read, never updated or deleted
#[derive(Clone)]
pub struct SecurityEventsRepository {
    pool: Arc<SqlitePool>,
}

impl SecurityEventsRepository {
    /// Create a new security events repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Append one event
    pub async fn append(&self, event: &NewSecurityEvent) -> Result<SecurityEvent> {
        let result = sqlx::query_as::<_, SecurityEvent>(
            r#"
            INSERT INTO security_events (user_id, action, ip_address, user_agent, details, severity, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, action, ip_address, user_agent, details, severity, created_at
            "#,
        )
        .bind(event.user_id)
        .bind(event.action)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.details)
        .bind(event.severity)
        .bind(crate::db::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to append security event: {}", e)))?;

        Ok(result)
    }

    /// List events, newest first
    pub async fn list(&self, query: &SecurityEventQuery) -> Result<Vec<SecurityEvent>> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let min_rank = query.min_severity.map(|s| s as i64);

        let result = sqlx::query_as::<_, SecurityEvent>(
            r#"
            SELECT id, user_id, action, ip_address, user_agent, details, severity, created_at
            FROM security_events
            WHERE (?1 IS NULL OR user_id = ?1)
              AND (?2 IS NULL OR action = ?2)
              AND (?3 IS NULL OR
                   CASE severity
                       WHEN 'info' THEN 0
                       WHEN 'warning' THEN 1
                       WHEN 'error' THEN 2
                       ELSE 3
                   END >= ?3)
            ORDER BY id DESC
            LIMIT ?4
            "#,
        )
        .bind(query.user_id)
        .bind(query.action)
        .bind(min_rank)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list security events: {}", e)))?;

        Ok(result)
    }
}

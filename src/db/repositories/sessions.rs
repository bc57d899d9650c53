use crate::{
    db::models::{session_models::Session, user_models::User},
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Sessions repository for handling bearer sessions
#[derive(Clone)]
pub struct SessionsRepository {
    pool: Arc<SqlitePool>,
}

impl SessionsRepository {
    /// Create a new sessions repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Store a freshly issued session
    pub async fn create(&self, session: &Session) -> Result<Session> {
        let result = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, expires_at, ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, expires_at, ip_address, user_agent, created_at
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create session: {}", e)))?;

        Ok(result)
    }

    /// Resolve a token to its owner when the session is unexpired and the owner active
    pub async fn find_active_user(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.email, u.password_hash, u.role, u.status,
                   u.failed_login_attempts, u.locked_until, u.last_login, u.created_at, u.updated_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.id = ? AND s.expires_at > ? AND u.status = 'active'
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to validate session: {}", e)))?;

        Ok(result)
    }

    /// Delete one session; returns whether it existed
    pub async fn delete(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(token)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete session: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every session owned by a user
    pub async fn delete_for_user(&self, user_id: &Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete user sessions: {}", e)))?;

        Ok(result.rows_affected())
    }

    /// Purge sessions whose expiry has passed
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete expired sessions: {}", e)))?;

        Ok(result.rows_affected())
    }
}

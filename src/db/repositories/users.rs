use crate::{
    db::models::user_models::{User, UserChanges, UserCounts},
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Outcome of one failed login, as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLoginState {
    pub failed_login_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Users repository for handling user operations
#[derive(Clone)]
pub struct UsersRepository {
    pool: Arc<SqlitePool>,
}

/// Map unique-index violations to a constraint error, everything else to a database error
fn write_error(context: &str, err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return Error::Constraint("Username or email already exists".to_string());
        }
    }
    Error::Database(format!("{}: {}", context, err))
}

impl UsersRepository {
    /// Create a new users repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Create a new user
    pub async fn create(&self, user: &User) -> Result<User> {
        info!("Creating new user: {}", user.username);

        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, status,
                               failed_login_attempts, locked_until, last_login, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, username, email, password_hash, role, status,
                      failed_login_attempts, locked_until, last_login, created_at, updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.status)
        .bind(user.failed_login_attempts)
        .bind(user.locked_until)
        .bind(user.last_login)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| write_error("Failed to create user", e))?;

        Ok(result)
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, status,
                   failed_login_attempts, locked_until, last_login, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by ID: {}", e)))?;

        Ok(result)
    }

    /// Get user by username
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, status,
                   failed_login_attempts, locked_until, last_login, created_at, updated_at
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by username: {}", e)))?;

        Ok(result)
    }

    /// Get all users, newest first
    pub async fn get_all(&self) -> Result<Vec<User>> {
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, status,
                   failed_login_attempts, locked_until, last_login, created_at, updated_at
            FROM users
            ORDER BY created_at DESC, username
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get all users: {}", e)))?;

        Ok(result)
    }

    /// Totals by status and the number of admins
    pub async fn counts(&self) -> Result<UserCounts> {
        let (total, active, admins) = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(status = 'active'), 0),
                   COALESCE(SUM(role = 'admin'), 0)
            FROM users
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count users: {}", e)))?;

        Ok(UserCounts {
            total,
            active,
            inactive: total - active,
            admins,
        })
    }

    /// Apply email/role/status changes in one statement.
    ///
    /// The statement refuses to demote or deactivate the last active admin,
    /// so the check and the write cannot interleave with another request.
    pub async fn update_profile(&self, id: &Uuid, changes: &UserChanges) -> Result<User> {
        let updated = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET email = COALESCE(?1, email),
                role = COALESCE(?2, role),
                status = COALESCE(?3, status),
                updated_at = ?4
            WHERE id = ?5
              AND NOT (
                  role = 'admin' AND status = 'active'
                  AND (COALESCE(?2, role) != 'admin' OR COALESCE(?3, status) != 'active')
                  AND (SELECT COUNT(*) FROM users WHERE role = 'admin' AND status = 'active') <= 1
              )
            RETURNING id, username, email, password_hash, role, status,
                      failed_login_attempts, locked_until, last_login, created_at, updated_at
            "#,
        )
        .bind(&changes.email)
        .bind(changes.role)
        .bind(changes.status)
        .bind(crate::db::now())
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| write_error("Failed to update user", e))?;

        match updated {
            Some(user) => Ok(user),
            None => match self.get_by_id(id).await? {
                None => Err(Error::NotFound(format!("User not found: {}", id)).into()),
                Some(_) => Err(Error::Constraint(
                    "Cannot demote or deactivate the last active administrator".to_string(),
                )
                .into()),
            },
        }
    }

    /// Replace the password hash
    pub async fn update_password(&self, id: &Uuid, password_hash: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(password_hash)
        .bind(crate::db::now())
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update password: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("User not found: {}", id)).into());
        }

        Ok(())
    }

    /// Delete a user unless it is the last active admin
    pub async fn delete(&self, id: &Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM users
            WHERE id = ?
              AND NOT (
                  role = 'admin' AND status = 'active'
                  AND (SELECT COUNT(*) FROM users WHERE role = 'admin' AND status = 'active') <= 1
              )
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to delete user: {}", e)))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get_by_id(id).await? {
            None => Err(Error::NotFound(format!("User not found: {}", id)).into()),
            Some(_) => Err(Error::Constraint(
                "Cannot delete the last active administrator".to_string(),
            )
            .into()),
        }
    }

    /// Count one failed login and lock the account when the threshold is reached.
    ///
    /// Returns `None` when the account is locked at `now`; the counter is left
    /// alone then. A lock that has run out restarts the count at 1.
    pub async fn record_failed_login(
        &self,
        id: &Uuid,
        now: DateTime<Utc>,
        max_attempts: i64,
        lock_until: DateTime<Utc>,
    ) -> Result<Option<FailedLoginState>> {
        let row = sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r#"
            UPDATE users
            SET failed_login_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until <= ?1 THEN 1
                    ELSE failed_login_attempts + 1
                END,
                locked_until = CASE
                    WHEN (CASE
                        WHEN locked_until IS NOT NULL AND locked_until <= ?1 THEN 1
                        ELSE failed_login_attempts + 1
                    END) >= ?2 THEN ?3
                    ELSE NULL
                END,
                updated_at = ?1
            WHERE id = ?4
              AND (locked_until IS NULL OR locked_until <= ?1)
            RETURNING failed_login_attempts, locked_until
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .bind(lock_until)
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to record failed login: {}", e)))?;

        Ok(row.map(|(failed_login_attempts, locked_until)| FailedLoginState {
            failed_login_attempts,
            locked_until,
        }))
    }

    /// Reset the failure counter and stamp last login unless the account is locked at `at`
    pub async fn record_successful_login(&self, id: &Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0, locked_until = NULL, last_login = ?1, updated_at = ?1
            WHERE id = ?2
              AND (locked_until IS NULL OR locked_until <= ?1)
            "#,
        )
        .bind(at)
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update last login: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}

use crate::config::{DatabaseConfig, SecurityConfig};
use crate::db::models::user_models::{User, UserRole, UserStatus};
use crate::db::repositories::users::UsersRepository;
use crate::security::password;
use anyhow::Result;
use sqlx::{Executor, SqlitePool};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Schema files in the order they are applied
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_users.sql", include_str!("sql/001_users.sql")),
    ("002_sessions.sql", include_str!("sql/002_sessions.sql")),
    ("003_security_events.sql", include_str!("sql/003_security_events.sql")),
    ("004_peers.sql", include_str!("sql/004_peers.sql")),
    ("005_indexes.sql", include_str!("sql/005_indexes.sql")),
];

/// Apply every migration; each file is idempotent
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    for (name, sql) in MIGRATIONS {
        execute_migration(pool, name, sql).await?;
    }

    Ok(())
}

async fn execute_migration(
    pool: &SqlitePool,
    name: &str,
    sql: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    pool.execute(sql).await?;
    info!("Applied migration: {}", name);
    Ok(())
}

/// Create the bootstrap admin if no users exist
pub async fn create_default_admin(
    pool: &Arc<SqlitePool>,
    config: &DatabaseConfig,
    security: &SecurityConfig,
) -> Result<()> {
    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&**pool)
        .await?;

    if user_count > 0 {
        return Ok(());
    }

    let (plain, generated) = match &config.admin_password {
        Some(configured) => (configured.clone(), false),
        None => (password::generate_random_password(16), true),
    };
    let password_hash = password::hash_password(&plain, security)?;

    let now = crate::db::now();
    let admin = User {
        id: Uuid::new_v4(),
        username: config.admin_username.clone(),
        email: None,
        password_hash,
        role: UserRole::Admin,
        status: UserStatus::Active,
        failed_login_attempts: 0,
        locked_until: None,
        last_login: None,
        created_at: now,
        updated_at: now,
    };

    UsersRepository::new(Arc::clone(pool)).create(&admin).await?;

    if generated {
        warn!(
            "Created admin user '{}' with a generated password; change it after the first login",
            admin.username
        );
        // shown once on the console, never written to the log stream
        eprintln!(
            "Initial password for admin user '{}': {}",
            admin.username, plain
        );
    } else {
        info!("Created admin user '{}' from configuration", admin.username);
    }

    Ok(())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Security event severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// What happened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SecurityAction {
    LoginSuccess,
    LoginFailed,
    LoginBlockedLocked,
    AccountLocked,
    Logout,
    UnauthorizedApiAccess,
    InsufficientPermissions,
    ApiRateLimitExceeded,
    PasswordChanged,
    PasswordReset,
    UserCreated,
    UserUpdated,
    UserUpdateFailed,
    UserDeleted,
    UserDeletionBlocked,
    PeerCreated,
    PeerUpdated,
    PeerDeleted,
    PeerConfigExported,
    TelemetryUnavailable,
    InfrastructureFailure,
}

impl SecurityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailed => "login_failed",
            Self::LoginBlockedLocked => "login_blocked_locked",
            Self::AccountLocked => "account_locked",
            Self::Logout => "logout",
            Self::UnauthorizedApiAccess => "unauthorized_api_access",
            Self::InsufficientPermissions => "insufficient_permissions",
            Self::ApiRateLimitExceeded => "api_rate_limit_exceeded",
            Self::PasswordChanged => "password_changed",
            Self::PasswordReset => "password_reset",
            Self::UserCreated => "user_created",
            Self::UserUpdated => "user_updated",
            Self::UserUpdateFailed => "user_update_failed",
            Self::UserDeleted => "user_deleted",
            Self::UserDeletionBlocked => "user_deletion_blocked",
            Self::PeerCreated => "peer_created",
            Self::PeerUpdated => "peer_updated",
            Self::PeerDeleted => "peer_deleted",
            Self::PeerConfigExported => "peer_config_exported",
            Self::TelemetryUnavailable => "telemetry_unavailable",
            Self::InfrastructureFailure => "infrastructure_failure",
        }
    }
}

impl Display for SecurityAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only security log row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SecurityEvent {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub action: SecurityAction,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

/// Event waiting to be appended
#[derive(Debug, Clone)]
pub struct NewSecurityEvent {
    pub user_id: Option<Uuid>,
    pub action: SecurityAction,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
    pub severity: Severity,
}

impl NewSecurityEvent {
    pub fn new(action: SecurityAction, severity: Severity) -> Self {
        Self {
            user_id: None,
            action,
            ip_address: None,
            user_agent: None,
            details: serde_json::json!({}),
            severity,
        }
    }

    pub fn user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Filters for listing events
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityEventQuery {
    pub user_id: Option<Uuid>,
    pub action: Option<SecurityAction>,
    pub min_severity: Option<Severity>,
    pub limit: Option<i64>,
}

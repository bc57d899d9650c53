//! Input validation for user and peer data.
//!
//! Every function returns the normalized value on success and an
//! `Error::Validation` describing the first rule that failed.

use crate::db::models::user_models::{UserRole, UserStatus};
use crate::error::Error;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

static USERNAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]{3,50}$").unwrap());

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*\.[a-z]{2,}$")
        .unwrap()
});

static PEER_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _.-]{0,63}$").unwrap());

const RESERVED_USERNAMES: &[&str] = &["root", "administrator", "system", "api", "www", "ftp", "mail"];

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "12345678",
    "admin",
    "root",
    "qwerty",
    "abc123",
    "password123",
    "admin123",
];

const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

fn invalid(message: &str) -> anyhow::Error {
    Error::Validation(message.to_string()).into()
}

/// Lowercase and check a username
pub fn validate_username(username: &str) -> Result<String> {
    let normalized = username.trim().to_lowercase();

    if !USERNAME_PATTERN.is_match(&normalized) {
        return Err(invalid(
            "Username must be 3-50 characters of lowercase letters, digits, '_' or '-'",
        ));
    }
    if RESERVED_USERNAMES.contains(&normalized.as_str()) {
        return Err(invalid("Username is reserved"));
    }

    Ok(normalized)
}

/// Email is optional; an empty string counts as absent
pub fn validate_email(email: Option<&str>) -> Result<Option<String>> {
    let normalized = match email.map(|e| e.trim().to_lowercase()) {
        None => return Ok(None),
        Some(e) if e.is_empty() => return Ok(None),
        Some(e) => e,
    };

    if normalized.len() > MAX_EMAIL_LEN || !EMAIL_PATTERN.is_match(&normalized) {
        return Err(invalid("Invalid email address"));
    }

    Ok(Some(normalized))
}

/// Check password length, character variety and the common-password list
pub fn validate_password(password: &str) -> Result<()> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err(invalid("Password must be at least 8 characters"));
    }
    if length > MAX_PASSWORD_LEN {
        return Err(invalid("Password must be at most 128 characters"));
    }

    let classes = [
        password.chars().any(|c| c.is_lowercase()),
        password.chars().any(|c| c.is_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric()),
    ];
    if classes.iter().filter(|present| **present).count() < 3 {
        return Err(invalid(
            "Password must contain at least three of: lowercase, uppercase, digits, symbols",
        ));
    }

    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        return Err(invalid("Password is too common"));
    }

    Ok(())
}

pub fn parse_role(role: &str) -> Result<UserRole> {
    match role.trim().to_lowercase().as_str() {
        "user" => Ok(UserRole::User),
        "moderator" => Ok(UserRole::Moderator),
        "admin" => Ok(UserRole::Admin),
        _ => Err(invalid("Role must be one of: user, moderator, admin")),
    }
}

pub fn parse_status(status: &str) -> Result<UserStatus> {
    match status.trim().to_lowercase().as_str() {
        "active" => Ok(UserStatus::Active),
        "inactive" => Ok(UserStatus::Inactive),
        "suspended" => Ok(UserStatus::Suspended),
        _ => Err(invalid("Status must be one of: active, inactive, suspended")),
    }
}

/// Peer names are 1-64 characters and start with a letter or digit
pub fn validate_peer_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if !PEER_NAME_PATTERN.is_match(trimmed) {
        return Err(invalid(
            "Peer name must be 1-64 characters of letters, digits, spaces, '_', '.' or '-'",
        ));
    }
    Ok(trimmed.to_string())
}

/// WireGuard keepalive interval in seconds, 0 disables it
pub fn validate_keepalive(seconds: i64) -> Result<i64> {
    if !(0..=65535).contains(&seconds) {
        return Err(invalid("Persistent keepalive must be between 0 and 65535 seconds"));
    }
    Ok(seconds)
}

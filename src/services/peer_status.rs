use crate::config::PeersConfig;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Connection state derived from the last handshake
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Connected,
    Idle,
    Disconnected,
}

impl PeerStatus {
    pub const ALL: [PeerStatus; 3] = [Self::Connected, Self::Idle, Self::Disconnected];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Idle => "idle",
            Self::Disconnected => "disconnected",
        }
    }
}

impl Display for PeerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake age boundaries between the three states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusThresholds {
    /// Younger than this is connected
    pub connected: Duration,
    /// Younger than this (and not connected) is idle
    pub idle: Duration,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            connected: Duration::minutes(5),
            idle: Duration::minutes(30),
        }
    }
}

impl From<&PeersConfig> for StatusThresholds {
    fn from(config: &PeersConfig) -> Self {
        Self {
            connected: Duration::seconds(config.connected_window_secs),
            idle: Duration::seconds(config.idle_window_secs),
        }
    }
}

impl StatusThresholds {
    /// Classify a handshake; a handshake in the future counts as just now
    pub fn derive(&self, last_handshake: Option<DateTime<Utc>>, now: DateTime<Utc>) -> PeerStatus {
        let Some(handshake) = last_handshake else {
            return PeerStatus::Disconnected;
        };

        let elapsed = (now - handshake).max(Duration::zero());
        if elapsed < self.connected {
            PeerStatus::Connected
        } else if elapsed < self.idle {
            PeerStatus::Idle
        } else {
            PeerStatus::Disconnected
        }
    }
}

/// Status with the default 5 / 30 minute thresholds
pub fn derive_status(last_handshake: Option<DateTime<Utc>>, now: DateTime<Utc>) -> PeerStatus {
    StatusThresholds::default().derive(last_handshake, now)
}

/// Human "last seen" text
pub fn relative_last_seen(last_handshake: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(handshake) = last_handshake else {
        return "never".to_string();
    };

    let elapsed = (now - handshake).max(Duration::zero());
    if elapsed < Duration::minutes(1) {
        "just now".to_string()
    } else if elapsed < Duration::hours(1) {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed < Duration::days(1) {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the configuration file path
pub const CONFIG_PATH_ENV: &str = "VPN_ADMIN_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub peers: PeersConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// API server address
    #[serde(default = "default_address")]
    pub address: String,
    /// API server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Origins allowed by CORS; empty means same-origin only
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            log_level: default_log_level(),
            cors_origins: Vec::new(),
            trust_proxy_headers: false,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_db_url")]
    pub url: String,
    /// Connection pool max size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Automatic migration on startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
    /// Username of the admin created when the users table is empty
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// Password for the bootstrap admin; a random one is generated and logged when absent
    #[serde(default)]
    pub admin_password: Option<String>,
}

fn default_db_url() -> String {
    "sqlite://vpn.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_admin_username() -> String {
    "admin".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            max_connections: default_max_connections(),
            auto_migrate: true,
            admin_username: default_admin_username(),
            admin_password: None,
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Password hashing cost (higher is more secure but slower)
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,
    /// Session lifetime in hours
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Consecutive failures that lock an account
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: i64,
    /// Lock duration in minutes
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,
}

fn default_password_hash_cost() -> u32 {
    12
}

/// One year
const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
/// One week
const MAX_LOCKOUT_MINUTES: i64 = 60 * 24 * 7;

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_max_failed_attempts() -> i64 {
    5
}

fn default_lockout_minutes() -> i64 {
    60
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            password_hash_cost: default_password_hash_cost(),
            session_ttl_hours: default_session_ttl_hours(),
            max_failed_attempts: default_max_failed_attempts(),
            lockout_minutes: default_lockout_minutes(),
        }
    }
}

/// Request rate limits, counted per client IP
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window across every route
    #[serde(default = "default_global_limit")]
    pub global_limit: usize,
    /// Requests per window under /api
    #[serde(default = "default_api_limit")]
    pub api_limit: usize,
    /// Login attempts per window
    #[serde(default = "default_login_limit")]
    pub login_limit: usize,
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_global_limit() -> usize {
    200
}

fn default_api_limit() -> usize {
    50
}

fn default_login_limit() -> usize {
    10
}

fn default_window_secs() -> u64 {
    15 * 60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_limit: default_global_limit(),
            api_limit: default_api_limit(),
            login_limit: default_login_limit(),
            window_secs: default_window_secs(),
        }
    }
}

/// Where peer telemetry comes from
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySourceKind {
    /// `wg show <interface> dump`
    WgShow,
    /// Static peers from `telemetry.fixture_peers`
    Fixture,
}

/// Peer telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_source")]
    pub source: TelemetrySourceKind,
    /// WireGuard interface name
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Path or name of the `wg` binary
    #[serde(default = "default_wg_binary")]
    pub wg_binary: String,
    /// Peers reported by the fixture source
    #[serde(default)]
    pub fixture_peers: Vec<FixturePeer>,
}

fn default_telemetry_source() -> TelemetrySourceKind {
    TelemetrySourceKind::WgShow
}

fn default_interface() -> String {
    "wg0".to_string()
}

fn default_wg_binary() -> String {
    "wg".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            source: default_telemetry_source(),
            interface: default_interface(),
            wg_binary: default_wg_binary(),
            fixture_peers: Vec::new(),
        }
    }
}

/// A peer reported by the fixture telemetry source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FixturePeer {
    pub public_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Seconds between the last handshake and the time of the poll
    #[serde(default)]
    pub handshake_secs_ago: Option<i64>,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default)]
    pub bytes_sent: u64,
}

/// Peer presentation and provisioning configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeersConfig {
    /// Handshakes younger than this are `connected`
    #[serde(default = "default_connected_window")]
    pub connected_window_secs: i64,
    /// Handshakes younger than this (and not connected) are `idle`
    #[serde(default = "default_idle_window")]
    pub idle_window_secs: i64,
    /// Tunnel network peers are allocated from
    #[serde(default = "default_network_cidr")]
    pub network_cidr: String,
    /// Endpoint written into client configs
    #[serde(default = "default_server_endpoint")]
    pub server_endpoint: String,
    /// Server public key written into client configs
    #[serde(default)]
    pub server_public_key: Option<String>,
    #[serde(default = "default_dns")]
    pub dns: String,
    #[serde(default = "default_keepalive")]
    pub default_keepalive: i64,
}

fn default_connected_window() -> i64 {
    5 * 60
}

fn default_idle_window() -> i64 {
    30 * 60
}

fn default_network_cidr() -> String {
    "10.8.0.0/24".to_string()
}

fn default_server_endpoint() -> String {
    "vpn.example.com:51820".to_string()
}

fn default_dns() -> String {
    "1.1.1.1".to_string()
}

fn default_keepalive() -> i64 {
    25
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            connected_window_secs: default_connected_window(),
            idle_window_secs: default_idle_window(),
            network_cidr: default_network_cidr(),
            server_endpoint: default_server_endpoint(),
            server_public_key: None,
            dns: default_dns(),
            default_keepalive: default_keepalive(),
        }
    }
}

/// Background sweep of expired sessions and idle rate-limit keys
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    5 * 60
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval(),
        }
    }
}

impl Config {
    /// Reject settings the services cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.peers.connected_window_secs <= 0
            || self.peers.idle_window_secs <= self.peers.connected_window_secs
        {
            anyhow::bail!(crate::error::Error::Config(
                "peers.idle_window_secs must be greater than peers.connected_window_secs > 0"
                    .to_string()
            ));
        }
        if self.security.max_failed_attempts < 1 {
            anyhow::bail!(crate::error::Error::Config(
                "security.max_failed_attempts must be at least 1".to_string()
            ));
        }
        if !(4..=31).contains(&self.security.password_hash_cost) {
            anyhow::bail!(crate::error::Error::Config(
                "security.password_hash_cost must be between 4 and 31".to_string()
            ));
        }
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.security.session_ttl_hours) {
            anyhow::bail!(crate::error::Error::Config(format!(
                "security.session_ttl_hours must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            )));
        }
        if !(1..=MAX_LOCKOUT_MINUTES).contains(&self.security.lockout_minutes) {
            anyhow::bail!(crate::error::Error::Config(format!(
                "security.lockout_minutes must be between 1 and {}",
                MAX_LOCKOUT_MINUTES
            )));
        }
        Ok(())
    }
}

/// Config file path from the environment, if set
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from)
}

/// Load configuration from a file or use default
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config: Config = match config_path {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .context(format!("Failed to read config file: {:?}", path))?;

            if path.extension().map_or(false, |ext| ext == "json") {
                serde_json::from_str(&config_str).context("Failed to parse JSON config")?
            } else if path.extension().map_or(false, |ext| ext == "toml") {
                toml::from_str(&config_str).context("Failed to parse TOML config")?
            } else {
                return Err(anyhow::anyhow!("Unsupported config file format"));
            }
        }
        None => Config::default(),
    };

    config.validate()?;
    Ok(config)
}

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod security;
pub mod services;
pub mod telemetry;

// Re-export main components for easier use
pub use api::rest::{AppState, RestApi};
pub use error::Error;
pub use security::auth::AuthService;
pub use services::{MaintenanceService, PeerManager};

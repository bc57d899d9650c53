pub mod peer_models;
pub mod security_event_models;
pub mod session_models;
pub mod user_models;

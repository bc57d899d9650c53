pub mod peers;
pub mod security_events;
pub mod sessions;
pub mod users;

pub mod maintenance;
pub mod peer_manager;
pub mod peer_status;
pub mod traffic;

pub use maintenance::MaintenanceService;
pub use peer_manager::PeerManager;

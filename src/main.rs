use anyhow::Result;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use vpn_admin::config::{self, Config};
use vpn_admin::db::DatabaseService;
use vpn_admin::security::rate_limit::{InMemoryRateLimiter, RateLimiter};
use vpn_admin::telemetry;
use vpn_admin::{AppState, AuthService, MaintenanceService, PeerManager, RestApi};

fn init_logging(config: &Config) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.api.log_level))
        .init();
}

async fn run_app() -> Result<()> {
    let config_path = config::config_path_from_env();
    let config = config::load_config(config_path.as_deref())?;

    init_logging(&config);
    info!("Starting VPN admin backend v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration loaded from {:?}", path),
        None => info!("No {} set, using default configuration", config::CONFIG_PATH_ENV),
    }

    // Create database connection pool and run migrations
    let database = DatabaseService::new(&config.database, &config.security).await?;
    let db_pool = Arc::clone(&database.pool);

    let telemetry = telemetry::build_source(&config.telemetry);
    info!("Peer telemetry source: {}", telemetry.name());

    let auth_service = Arc::new(AuthService::new(Arc::clone(&db_pool), &config.security)?);
    let peer_manager = Arc::new(PeerManager::new(
        Arc::clone(&db_pool),
        telemetry,
        &config.peers,
    )?);
    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(InMemoryRateLimiter::new(
        Duration::from_secs(config.rate_limit.window_secs),
    ));

    let maintenance = Arc::new(MaintenanceService::new(
        config.maintenance.clone(),
        Arc::clone(&auth_service),
        Arc::clone(&rate_limiter),
    ));
    let sweeper = maintenance.start();

    let state = AppState {
        db_pool,
        auth_service,
        peer_manager,
        rate_limiter,
        rate_limit: config.rate_limit.clone(),
        trust_proxy_headers: config.api.trust_proxy_headers,
    };

    let http_server = RestApi::new(&config.api, state)?;
    http_server.run().await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Shutdown complete");

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

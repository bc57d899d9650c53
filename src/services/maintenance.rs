use crate::config::MaintenanceConfig;
use crate::security::auth::AuthService;
use crate::security::rate_limit::RateLimiter;
use anyhow::Result;
use log::{debug, error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_sessions: u64,
    pub idle_rate_limit_keys: usize,
}

/// Periodic cleanup of expired sessions and idle rate-limit buckets
pub struct MaintenanceService {
    config: MaintenanceConfig,
    auth: Arc<AuthService>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl MaintenanceService {
    pub fn new(
        config: MaintenanceConfig,
        auth: Arc<AuthService>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            auth,
            rate_limiter,
        }
    }

    /// Start the sweeper in the background; returns `None` when disabled
    pub fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Maintenance sweeper is disabled");
            return None;
        }

        info!(
            "Starting maintenance sweeper with interval of {} seconds",
            self.config.interval_secs
        );

        Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if let Err(e) = self.run_sweep().await {
                    error!("Error running maintenance sweep: {}", e);
                }
            }
        }))
    }

    /// Run one sweep now
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let idle_rate_limit_keys = self.rate_limiter.sweep();
        let expired_sessions = self.auth.sweep_expired_sessions(crate::db::now()).await?;

        let report = SweepReport {
            expired_sessions,
            idle_rate_limit_keys,
        };

        if report != SweepReport::default() {
            info!(
                "Maintenance sweep removed {} expired sessions and {} idle rate-limit keys",
                report.expired_sessions, report.idle_rate_limit_keys
            );
        } else {
            debug!("Maintenance sweep found nothing to remove");
        }

        Ok(report)
    }
}

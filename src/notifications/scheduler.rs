use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::generator::NotificationGenerator;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Owns the background task that runs the generator on a fixed period.
pub struct NotificationScheduler {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl NotificationScheduler {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the loop tied to `cancel_token`. A zero period leaves the scheduler idle.
    pub fn start(
        &mut self,
        generator: NotificationGenerator,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("notification scheduler already running");
        }
        if period.is_zero() {
            log_info!("notification scheduler disabled; relying on the cron endpoint");
            return Ok(());
        }

        let handle = tokio::spawn(scheduler_loop(generator, period, cancel_token.clone()));
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("notification scheduler task failed to join")
        } else {
            Ok(())
        }
    }
}

impl Default for NotificationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn scheduler_loop(
    generator: NotificationGenerator,
    period: Duration,
    cancel_token: CancellationToken,
) {
    // first run one full period after startup
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log_info!("notification scheduler started (every {}s)", period.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = tokio::select! {
                    report = generator.generate_all(Utc::now()) => report,
                    _ = cancel_token.cancelled() => {
                        log_warn!("notification run interrupted by shutdown");
                        break;
                    }
                };
                if !report.failures.is_empty() {
                    log_warn!("notification run finished with {} failures", report.failures.len());
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("notification scheduler shutting down");
                break;
            }
        }
    }
}

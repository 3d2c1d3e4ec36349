use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::DaemonSettings;

/// Check-in scheduler with jitter so a fleet doesn't hit the server in lockstep
pub struct PollingScheduler {
    base_interval: Duration,
    jitter_range: Duration,
}

impl PollingScheduler {
    /// Create a new polling scheduler
    ///
    /// # Arguments
    /// * `interval_secs` - Base polling interval in seconds
    /// * `jitter_secs` - Maximum jitter to add in seconds
    pub fn new(interval_secs: u64, jitter_secs: u64) -> Self {
        Self {
            base_interval: Duration::from_secs(interval_secs),
            jitter_range: Duration::from_secs(jitter_secs),
        }
    }

    pub fn from_settings(settings: &DaemonSettings) -> Self {
        Self::new(settings.poll_interval, settings.poll_jitter)
    }

    /// Sleep for the next interval, returning when the next check-in is due
    pub async fn sleep_until_next_poll(&self) {
        let sleep_duration = self.calculate_next_interval();
        let next = Utc::now()
            + chrono::Duration::from_std(sleep_duration).unwrap_or(chrono::Duration::zero());
        tracing::debug!(
            "Sleeping for {} seconds, next check-in at {}",
            sleep_duration.as_secs(),
            format_time(next)
        );
        sleep(sleep_duration).await;
    }

    /// Calculate the next sleep interval with jitter
    fn calculate_next_interval(&self) -> Duration {
        self.base_interval + self.random_jitter()
    }

    /// Generate random jitter in range [0, jitter_range]
    fn random_jitter(&self) -> Duration {
        let jitter_secs = rand::thread_rng().gen_range(0..=self.jitter_range.as_secs());
        Duration::from_secs(jitter_secs)
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

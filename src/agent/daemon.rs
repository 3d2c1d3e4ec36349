use super::{Agent, PollingScheduler, SyncOutcome};

/// Check in forever, one cycle per scheduler tick
///
/// A failed cycle is logged and the loop carries on; the next tick is the retry.
pub async fn run_daemon(agent: &Agent, scheduler: &PollingScheduler) {
    tracing::info!("Starting config agent daemon");
    tracing::info!("Config URL: {}", agent.config_url());
    tracing::info!("Secrets directory: {}", agent.secrets_dir().display());

    loop {
        match agent.check_in().await {
            Ok(SyncOutcome::Updated(summary)) => {
                tracing::info!(
                    "Config updated ({} secrets written, {} hook failures)",
                    summary.written,
                    summary.hook_failures
                );
            }
            Ok(SyncOutcome::NotModified) => {
                tracing::debug!("Config unchanged");
            }
            Err(e) => {
                tracing::error!("Check-in failed: {:#}", anyhow::Error::new(e));
            }
        }

        scheduler.sleep_until_next_poll().await;
    }
}

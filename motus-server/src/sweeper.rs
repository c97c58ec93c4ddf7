//! Background sweep that deactivates sessions idle past the rotation
//! threshold, so users coming back after a long gap start a fresh session
//! even if no message ever triggers the lazy rotation path.

use std::sync::Arc;

use motus_core::SessionManager;
use tokio::sync::broadcast;

pub async fn run_sweeper_loop(
    sessions: Arc<SessionManager>,
    interval_minutes: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(interval_minutes * 60);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Session sweeper started (interval: {}min)", interval_minutes);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sessions.sweep_idle().await {
                    Ok(swept) if swept > 0 => {
                        tracing::info!("Session sweep complete: {} deactivated", swept);
                    }
                    Ok(_) => tracing::debug!("Session sweep: nothing idle"),
                    Err(e) => tracing::error!("Session sweep error: {}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session sweeper shutting down...");
                break;
            }
        }
    }
}

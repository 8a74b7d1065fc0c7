//! Background timer that refreshes configuration and drives idle passes.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ManagerSettings;
use crate::core::ResourceGroupManager;

/// Stops the refresh loop when asked or dropped.
#[derive(Debug)]
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn a loop calling [`ResourceGroupManager::refresh`] and
/// [`ResourceGroupManager::tick`] at the periods configured in `settings`.
///
/// Failures are logged and the loop keeps running, so a bad configuration
/// file only delays the next reload.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
pub fn spawn_refresh_loop(
    manager: Arc<dyn ResourceGroupManager>,
    settings: &ManagerSettings,
) -> RefreshHandle {
    let (refresh_interval, tick_interval) = (settings.refresh_interval(), settings.tick_interval());
    let (shutdown, mut stop) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut refresh = tokio::time::interval(refresh_interval);
        let mut tick = tokio::time::interval(tick_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Both intervals fire immediately; the first refresh is the caller's job.
        refresh.tick().await;
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    tracing::info!("resource group refresh loop shutting down");
                    break;
                }
                _ = refresh.tick() => {
                    if let Err(err) = manager.refresh() {
                        tracing::warn!(error = %err, "resource group configuration refresh failed");
                    }
                }
                _ = tick.tick() => {
                    if let Err(err) = manager.tick() {
                        tracing::error!(error = %err, "resource group tick failed");
                    }
                }
            }
        }
    });
    RefreshHandle { shutdown, task }
}

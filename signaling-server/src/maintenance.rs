//! Periodic background work: transport liveness probing and registry expiry.
//! Neither task holds a lock across I/O, so relaying is never delayed by them.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::state::{AppState, SignalingState};

/// Probe every connection each `interval`; connections that ignored the previous
/// probe are terminated and their room slot freed.
pub fn spawn_prober(signaling: Arc<Mutex<SignalingState>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // skip first immediate tick

        loop {
            ticker.tick().await;
            let report = signaling.lock().await.probe();
            for conn_id in &report.evicted {
                warn!("Evicted unresponsive connection {}", conn_id);
            }
            debug!(
                "Liveness probe: {} probed, {} evicted",
                report.probed,
                report.evicted.len()
            );
        }
    })
}

/// Delete expired reservations every `interval`.
pub fn spawn_sweeper(app: Arc<AppState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = app.registry.lock().await.sweep();
            if removed > 0 {
                info!("Registry sweep removed {} expired reservations", removed);
            }

            #[cfg(feature = "postgres")]
            {
                let db = app.backends.lock().await.db.clone();
                if let Some(pool) = db {
                    match crate::state::backends::delete_expired_db(&pool).await {
                        Ok(n) if n > 0 => info!("Deleted {} expired reservation rows", n),
                        Ok(_) => {}
                        Err(e) => warn!("Registry DB sweep failed: {}", e),
                    }
                }
            }
        }
    })
}

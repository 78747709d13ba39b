//! Background reclamation of timed-out blocks and idle keys.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{KeyPool, metrics};

/// Default period between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the periodic sweep task for `pool`.
///
/// Runs until `token` is cancelled. Sweeps are infallible; whatever was
/// reclaimed is logged and counted and the loop continues unattended.
pub fn spawn_reclaimer(
    pool: KeyPool,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("reclaimer task stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let stats = pool.sweep(Utc::now());
                    metrics::RECLAIM_SWEEPS.inc();
                    metrics::RECLAIMED_BLOCKED_KEYS.inc_by(stats.unblocked);
                    metrics::EXPIRED_IDLE_KEYS.inc_by(stats.expired);
                    if stats.unblocked > 0 || stats.expired > 0 {
                        debug!(
                            unblocked = stats.unblocked,
                            expired = stats.expired,
                            "reclaimer sweep completed"
                        );
                    }
                }
            }
        }
    })
}

//! Sync coordinator - drives retry-queue drains and housekeeping
//!
//! Drains when connectivity is restored, and on a periodic timer while
//! online. Each tick also purges expired cache entries and applies local
//! retention.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::profile_store::ProfileStore;
use crate::session::Session;
use crate::store::{LocalStore, RemoteStore};
use crate::sync::clock::now_millis;
use crate::sync::queue::DrainReport;

/// Local replica retention applied on every tick
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_records: usize,
}

pub struct SyncCoordinator {
    store: Arc<ProfileStore>,
    session: Arc<Session>,
    local: Option<Arc<LocalStore>>,
    retention: RetentionPolicy,
    drain_interval: Duration,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<ProfileStore>,
        session: Arc<Session>,
        local: Option<Arc<LocalStore>>,
        retention: RetentionPolicy,
        drain_interval: Duration,
    ) -> Self {
        Self {
            store,
            session,
            local,
            retention,
            drain_interval,
        }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(
        self,
        mut connectivity: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut timer = tokio::time::interval(self.drain_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut online = *connectivity.borrow_and_update();
        let mut watching = true;
        info!(online, interval_secs = self.drain_interval.as_secs(), "Sync coordinator started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if online {
                        self.drain_now().await;
                    }
                    self.housekeeping().await;
                }
                changed = connectivity.changed(), if watching => {
                    if changed.is_err() {
                        debug!("Connectivity source closed; timer-only draining");
                        watching = false;
                        online = true;
                        continue;
                    }
                    let now_online = *connectivity.borrow_and_update();
                    if now_online && !online {
                        info!("Connectivity restored, draining sync queue");
                        self.drain_now().await;
                    } else if !now_online && online {
                        warn!("Connectivity lost");
                    }
                    online = now_online;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.store.queue().flush().await {
            error!(error = %e, "Failed to flush sync queue on shutdown");
        }
        info!("Sync coordinator stopped");
    }

    /// One drain pass; errors are logged, never returned.
    pub async fn drain_now(&self) -> Option<DrainReport> {
        match self.store.queue().drain().await {
            Ok(report) => {
                for dropped in &report.dropped {
                    warn!(error = %dropped, "Write permanently dropped");
                }
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Sync queue drain failed");
                None
            }
        }
    }

    async fn housekeeping(&self) {
        let purged = self.store.purge_expired().await;
        if purged > 0 {
            debug!(purged, "Expired cache entries purged");
        }

        if let Some(ref local) = self.local {
            let keep = self.session.current_user().await;
            if let Err(e) = local.evict_stale(
                keep.as_deref(),
                self.retention.max_age,
                self.retention.max_records,
                now_millis(),
            ) {
                error!(error = %e, "Local retention sweep failed");
            }
        }
    }
}

/// Poll a remote's reachability and publish transitions on `tx`.
pub async fn probe_connectivity(
    remote: Arc<RemoteStore>,
    interval: Duration,
    tx: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let reachable = remote.is_reachable().await;
                tx.send_if_modified(|online| {
                    if *online != reachable {
                        *online = reachable;
                        true
                    } else {
                        false
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

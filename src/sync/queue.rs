//! Durable retry queue for writes a store rejected
//!
//! Entries live in a sled tree keyed `{store}:{user_id}`, so at most one
//! pending write exists per (store, user) and the queue survives restarts.
//!
//! ```text
//! Pending --success--------------------> Removed
//! Pending --failure, attempts < ceiling-> Pending (attempts + 1)
//! Pending --failure, attempts = ceiling-> Dropped (reported)
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::profile::ProfileRecord;
use crate::store::{StoreId, StoreSet};
use crate::sync::clock::now_millis;

const QUEUE_TREE: &str = "sync_queue";

/// One pending write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedWrite {
    pub store: StoreId,
    pub record: ProfileRecord,
    /// Failed drain attempts so far
    pub attempts: u32,
    /// FIFO position
    pub seq: u64,
    /// Unix millis of the (latest) enqueue
    pub enqueued_at: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Outcome of one `drain()` pass
#[derive(Debug, Default)]
pub struct DrainReport {
    /// (store, user_id) pairs written successfully and removed
    pub applied: Vec<(StoreId, String)>,
    /// Entries that failed and stay queued
    pub retried: usize,
    /// Entries removed after hitting the retry ceiling
    pub dropped: Vec<SyncError>,
    /// Another drain was already running; nothing was attempted
    pub skipped: bool,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.applied.len() + self.retried + self.dropped.len()
    }
}

/// Coalescing, bounded-retry write queue
pub struct SyncQueue {
    db: sled::Db,
    tree: sled::Tree,
    stores: StoreSet,
    retry_ceiling: u32,
    drain_lock: Mutex<()>,
}

impl SyncQueue {
    pub fn new(db: &sled::Db, stores: StoreSet, retry_ceiling: u32) -> Result<Self> {
        if retry_ceiling == 0 {
            return Err(SyncError::Config("retry_ceiling must be at least 1".into()));
        }
        let tree = db.open_tree(QUEUE_TREE)?;
        info!(pending = tree.len(), retry_ceiling, "SyncQueue initialized");
        Ok(Self {
            db: db.clone(),
            tree,
            stores,
            retry_ceiling,
            drain_lock: Mutex::new(()),
        })
    }

    fn key(store: StoreId, user_id: &str) -> String {
        format!("{}:{}", store, user_id)
    }

    /// Queue a write for `store`, coalescing with any pending write for the
    /// same user. Returns `false` if a newer write was already pending.
    pub fn enqueue(&self, store: StoreId, record: &ProfileRecord) -> Result<bool> {
        let key = Self::key(store, &record.user_id);
        loop {
            let existing = self.tree.get(key.as_bytes())?;
            if let Some(ref bytes) = existing {
                let pending: QueuedWrite = rmp_serde::from_slice(bytes)?;
                if pending.record.is_newer_than(record) {
                    debug!(%store, user_id = %record.user_id, "Older write not queued; newer one pending");
                    return Ok(false);
                }
            }

            let entry = QueuedWrite {
                store,
                record: record.clone(),
                attempts: 0,
                seq: self.db.generate_id()?,
                enqueued_at: now_millis(),
                last_error: None,
            };
            let bytes = rmp_serde::to_vec_named(&entry)?;

            match self
                .tree
                .compare_and_swap(key.as_bytes(), existing, Some(bytes))?
            {
                Ok(()) => {
                    debug!(%store, user_id = %record.user_id, updated_at = record.updated_at, "Write queued");
                    return Ok(true);
                }
                // Raced with another writer; re-read and try again.
                Err(_) => continue,
            }
        }
    }

    /// Pending entries in FIFO order
    pub fn entries(&self) -> Result<Vec<QueuedWrite>> {
        Ok(self.raw_entries()?.into_iter().map(|(_, _, e)| e).collect())
    }

    fn raw_entries(&self) -> Result<Vec<(sled::IVec, sled::IVec, QueuedWrite)>> {
        let mut entries = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (key, value) = item?;
            let entry: QueuedWrite = rmp_serde::from_slice(&value)?;
            entries.push((key, value, entry));
        }
        entries.sort_by_key(|(_, _, e)| e.seq);
        Ok(entries)
    }

    pub fn get(&self, store: StoreId, user_id: &str) -> Result<Option<QueuedWrite>> {
        match self.tree.get(Self::key(store, user_id).as_bytes())? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Drop the pending write for (`store`, `record.user_id`) once `record`
    /// has reached that store directly, unless the pending one is newer.
    /// Returns whether an entry was removed.
    pub fn discard_superseded(&self, store: StoreId, record: &ProfileRecord) -> Result<bool> {
        let key = Self::key(store, &record.user_id);
        loop {
            let Some(bytes) = self.tree.get(key.as_bytes())? else {
                return Ok(false);
            };
            let pending: QueuedWrite = rmp_serde::from_slice(&bytes)?;
            if pending.record.is_newer_than(record) {
                return Ok(false);
            }

            match self
                .tree
                .compare_and_swap(key.as_bytes(), Some(&bytes), None as Option<&[u8]>)?
            {
                Ok(()) => {
                    debug!(%store, user_id = %record.user_id, "Queued write superseded by direct write");
                    return Ok(true);
                }
                Err(_) => continue,
            }
        }
    }

    /// Discard every pending write for one store. Returns how many were removed.
    pub fn clear_store(&self, store: StoreId) -> Result<usize> {
        let prefix = format!("{}:", store);
        let mut removed = 0;
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item?;
            self.tree.remove(key)?;
            removed += 1;
        }
        if removed > 0 {
            info!(%store, removed, "Cleared queued writes");
        }
        Ok(removed)
    }

    /// Attempt every queued write once.
    ///
    /// Single-flight: a call made while another drain is running returns
    /// immediately with `skipped` set. Entries replaced by a newer enqueue
    /// while their attempt was in flight are left for the next pass.
    pub async fn drain(&self) -> Result<DrainReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress, skipping");
            return Ok(DrainReport {
                skipped: true,
                ..Default::default()
            });
        };

        let mut report = DrainReport::default();
        for (key, bytes, entry) in self.raw_entries()? {
            match self.stores.attempt_put(entry.store, &entry.record).await {
                Ok(()) => {
                    self.tree
                        .compare_and_swap(&key, Some(&bytes), None as Option<&[u8]>)?
                        .ok();
                    report.applied.push((entry.store, entry.record.user_id.clone()));
                }
                Err(e) => {
                    let attempts = entry.attempts + 1;
                    if attempts >= self.retry_ceiling {
                        self.tree
                            .compare_and_swap(&key, Some(&bytes), None as Option<&[u8]>)?
                            .ok();
                        let dropped = SyncError::RetryCeilingExceeded {
                            store: entry.store,
                            user_id: entry.record.user_id.clone(),
                            attempts,
                        };
                        warn!(error = %dropped, last_error = %e, "Queued write dropped");
                        report.dropped.push(dropped);
                    } else {
                        let updated = QueuedWrite {
                            attempts,
                            last_error: Some(e.to_string()),
                            ..entry
                        };
                        let new_bytes = rmp_serde::to_vec_named(&updated)?;
                        self.tree
                            .compare_and_swap(&key, Some(&bytes), Some(new_bytes))?
                            .ok();
                        debug!(store = %updated.store, user_id = %updated.record.user_id, attempts, error = %e, "Queued write failed, will retry");
                        report.retried += 1;
                    }
                }
            }
        }

        if report.attempted() > 0 {
            info!(
                applied = report.applied.len(),
                retried = report.retried,
                dropped = report.dropped.len(),
                "Sync queue drained"
            );
        }
        Ok(report)
    }

    pub async fn flush(&self) -> Result<()> {
        self.tree.flush_async().await?;
        Ok(())
    }
}

//! Durable writer - fan a record out to every configured store
//!
//! Attempts run concurrently and independently, each bounded by the store
//! timeout. A failure or timeout in one store never cancels the others.
//! Every store that failed gets a queued retry; a store that succeeded has
//! any older queued write for the same user discarded.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::error::SyncError;
use crate::profile::ProfileRecord;
use crate::store::{StoreId, StoreSet};
use crate::sync::queue::SyncQueue;

/// Which stores accepted a write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub succeeded: BTreeSet<StoreId>,
    pub failed: BTreeSet<StoreId>,
}

impl WriteReport {
    /// No store accepted the write
    pub fn is_total_failure(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }

    pub fn into_error(self) -> SyncError {
        SyncError::AllStoresFailed {
            failed: self.failed,
        }
    }
}

pub struct DurableWriter {
    stores: StoreSet,
    queue: Arc<SyncQueue>,
}

impl DurableWriter {
    pub fn new(stores: StoreSet, queue: Arc<SyncQueue>) -> Self {
        Self { stores, queue }
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Write to every configured store.
    pub async fn write(&self, record: &ProfileRecord) -> WriteReport {
        let targets = self.stores.ids();
        self.write_to(record, &targets).await
    }

    /// Write to a subset of the configured stores.
    pub async fn write_to(&self, record: &ProfileRecord, targets: &[StoreId]) -> WriteReport {
        let attempts = targets.iter().map(|&id| async move {
            (id, self.stores.attempt_put(id, record).await)
        });

        let mut report = WriteReport::default();
        for (id, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    report.succeeded.insert(id);
                }
                Err(e) => {
                    warn!(store = %id, user_id = %record.user_id, error = %e, "Store write failed");
                    report.failed.insert(id);
                }
            }
        }

        for &id in &report.succeeded {
            if let Err(e) = self.queue.discard_superseded(id, record) {
                error!(store = %id, user_id = %record.user_id, error = %e, "Failed to clear superseded queued write");
            }
        }
        for &id in &report.failed {
            if let Err(e) = self.queue.enqueue(id, record) {
                error!(store = %id, user_id = %record.user_id, error = %e, "Failed to queue write for retry");
            }
        }

        debug!(
            user_id = %record.user_id,
            succeeded = ?report.succeeded,
            failed = ?report.failed,
            "Write fan-out finished"
        );
        report
    }
}

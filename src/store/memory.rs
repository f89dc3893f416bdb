//! In-process backing store with switchable failure modes

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BackingStore, StoreId};
use crate::error::{Result, SyncError};
use crate::profile::ProfileRecord;

/// How the store answers calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Healthy,
    /// Every call returns `StoreUnavailable`
    Failing,
    /// Every call never completes
    Hanging,
}

/// HashMap-backed store. Used for offline mode and to script outages.
pub struct MemoryStore {
    id: StoreId,
    records: Mutex<HashMap<String, ProfileRecord>>,
    mode: Mutex<FailureMode>,
    puts: AtomicU64,
}

impl MemoryStore {
    pub fn new(id: StoreId) -> Self {
        Self {
            id,
            records: Mutex::new(HashMap::new()),
            mode: Mutex::new(FailureMode::Healthy),
            puts: AtomicU64::new(0),
        }
    }

    pub fn set_mode(&self, mode: FailureMode) {
        *lock(&self.mode) = mode;
    }

    pub fn mode(&self) -> FailureMode {
        *lock(&self.mode)
    }

    /// Place a record directly, bypassing the failure mode.
    pub fn seed(&self, record: ProfileRecord) {
        lock(&self.records).insert(record.user_id.clone(), record);
    }

    /// Read a record directly, bypassing the failure mode.
    pub fn peek(&self, user_id: &str) -> Option<ProfileRecord> {
        lock(&self.records).get(user_id).cloned()
    }

    /// Successful writes so far
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    async fn check(&self) -> Result<()> {
        match self.mode() {
            FailureMode::Healthy => Ok(()),
            FailureMode::Failing => Err(SyncError::unavailable(self.id, "store offline")),
            FailureMode::Hanging => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    fn id(&self) -> StoreId {
        self.id
    }

    async fn get_record(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        self.check().await?;
        Ok(self.peek(user_id))
    }

    async fn put_record(&self, record: &ProfileRecord) -> Result<()> {
        self.check().await?;
        self.seed(record.clone());
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<ProfileRecord>> {
        self.check().await?;
        Ok(lock(&self.records)
            .values()
            .find(|r| r.username == username)
            .cloned())
    }
}

// Poisoning only follows a panic in another holder; the data is still usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

//! Backing stores - every place a profile replica can live
//!
//! Handles:
//! - The `BackingStore` trait each store implements
//! - `StoreSet`: the configured list of stores plus timed single attempts
//! - Local (sled), remote (HTTP) and in-memory implementations

pub mod local;
pub mod memory;
pub mod remote;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::profile::ProfileRecord;

pub use local::LocalStore;
pub use memory::{FailureMode, MemoryStore};
pub use remote::{RemoteSchema, RemoteStore};

/// Logical identity of a backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreId {
    /// In-process store (offline mode, tests)
    Memory,
    /// Local persistent store on this device
    Local,
    /// Remote database of record
    Primary,
    /// Second remote database
    Secondary,
}

impl StoreId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreId::Memory => "memory",
            StoreId::Local => "local",
            StoreId::Primary => "primary",
            StoreId::Secondary => "secondary",
        }
    }

    /// Tie-break rank when two replicas carry the same `updated_at`.
    /// Higher wins: the remote of record beats everything.
    pub fn tie_rank(&self) -> u8 {
        match self {
            StoreId::Primary => 3,
            StoreId::Secondary => 2,
            StoreId::Local => 1,
            StoreId::Memory => 0,
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(StoreId::Memory),
            "local" => Ok(StoreId::Local),
            "primary" => Ok(StoreId::Primary),
            "secondary" => Ok(StoreId::Secondary),
            other => Err(SyncError::Config(format!("unknown store '{}'", other))),
        }
    }
}

/// A place profile replicas are read from and written to.
#[async_trait]
pub trait BackingStore: Send + Sync {
    fn id(&self) -> StoreId;

    /// `Ok(None)` means the store answered and has no copy.
    async fn get_record(&self, user_id: &str) -> Result<Option<ProfileRecord>>;

    async fn put_record(&self, record: &ProfileRecord) -> Result<()>;

    async fn find_by_username(&self, username: &str) -> Result<Option<ProfileRecord>>;
}

/// The configured stores, in configuration order.
#[derive(Clone)]
pub struct StoreSet {
    stores: Vec<Arc<dyn BackingStore>>,
    timeout: Duration,
}

impl StoreSet {
    pub fn new(stores: Vec<Arc<dyn BackingStore>>, timeout: Duration) -> Result<Self> {
        if stores.is_empty() {
            return Err(SyncError::Config("at least one store is required".into()));
        }
        let mut seen = Vec::with_capacity(stores.len());
        for store in &stores {
            if seen.contains(&store.id()) {
                return Err(SyncError::Config(format!(
                    "store '{}' configured twice",
                    store.id()
                )));
            }
            seen.push(store.id());
        }
        Ok(Self { stores, timeout })
    }

    pub fn ids(&self) -> Vec<StoreId> {
        self.stores.iter().map(|s| s.id()).collect()
    }

    pub fn get(&self, id: StoreId) -> Option<&Arc<dyn BackingStore>> {
        self.stores.iter().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BackingStore>> {
        self.stores.iter()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One bounded write attempt against a single store.
    pub async fn attempt_put(&self, id: StoreId, record: &ProfileRecord) -> Result<()> {
        let store = self
            .get(id)
            .ok_or_else(|| SyncError::unavailable(id, "store not configured"))?;
        self.timed(id, store.put_record(record)).await?;
        debug!(store = %id, user_id = %record.user_id, updated_at = record.updated_at, "Record written");
        Ok(())
    }

    /// One bounded read attempt against a single store.
    pub async fn attempt_get(&self, id: StoreId, user_id: &str) -> Result<Option<ProfileRecord>> {
        let store = self
            .get(id)
            .ok_or_else(|| SyncError::unavailable(id, "store not configured"))?;
        self.timed(id, store.get_record(user_id)).await
    }

    pub async fn attempt_find(&self, id: StoreId, username: &str) -> Result<Option<ProfileRecord>> {
        let store = self
            .get(id)
            .ok_or_else(|| SyncError::unavailable(id, "store not configured"))?;
        self.timed(id, store.find_by_username(username)).await
    }

    async fn timed<T>(
        &self,
        id: StoreId,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                store: id,
                millis: self.timeout.as_millis() as u64,
            }),
        }
    }
}

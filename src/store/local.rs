//! Local Store - on-device profile persistence
//!
//! Stores profile replicas in sled so they survive restarts. Values are
//! MessagePack-encoded `ProfileRecord`s keyed by user id, with a secondary
//! `username -> user_id` index.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{BackingStore, StoreId};
use crate::error::{Result, SyncError};
use crate::profile::ProfileRecord;

const PROFILES_TREE: &str = "profiles";
const USERNAMES_TREE: &str = "usernames";

/// Profile store backed by sled
pub struct LocalStore {
    /// Records tree
    profiles: sled::Tree,
    /// Username index tree
    usernames: sled::Tree,
    /// Maximum encoded bytes across all records (0 = unlimited)
    quota_bytes: u64,
    /// Encoded bytes currently stored. Held across every quota check and
    /// the mutation it guards.
    used_bytes: Mutex<u64>,
}

impl LocalStore {
    /// Open the store's trees inside an existing database
    pub fn new(db: &sled::Db, quota_bytes: u64) -> Result<Self> {
        let profiles = db.open_tree(PROFILES_TREE)?;
        let usernames = db.open_tree(USERNAMES_TREE)?;

        let mut used = 0u64;
        for item in profiles.iter() {
            let (_, value) = item?;
            used += value.len() as u64;
        }

        info!(records = profiles.len(), used_bytes = used, quota_bytes, "LocalStore initialized");

        Ok(Self {
            profiles,
            usernames,
            quota_bytes,
            used_bytes: Mutex::new(used),
        })
    }

    /// Open a dedicated database at `path`
    pub fn at_path(path: impl AsRef<Path>, quota_bytes: u64) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Config(format!("creating {}: {}", parent.display(), e)))?;
        }
        let db = sled::open(path.as_ref())?;
        Self::new(&db, quota_bytes)
    }

    pub fn used_bytes(&self) -> u64 {
        *self.usage()
    }

    fn usage(&self) -> MutexGuard<'_, u64> {
        // Poisoning only follows a panic in another holder; the count is still usable.
        self.used_bytes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn load(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        match self.profiles.get(user_id.as_bytes())? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        let mut used = self.usage();
        let Some(bytes) = self.profiles.remove(user_id.as_bytes())? else {
            return Ok(None);
        };
        *used = used.saturating_sub(bytes.len() as u64);
        drop(used);
        let record: ProfileRecord = rmp_serde::from_slice(&bytes)?;
        self.unindex(&record.username, user_id)?;
        Ok(Some(record))
    }

    fn unindex(&self, username: &str, user_id: &str) -> Result<()> {
        if username.is_empty() {
            return Ok(());
        }
        if let Some(owner) = self.usernames.get(username.as_bytes())? {
            if owner.as_ref() == user_id.as_bytes() {
                self.usernames.remove(username.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Bounded retention for cached replicas.
    ///
    /// Removes records older than `max_age` (relative to `now_ms`), then the
    /// oldest remaining ones until at most `max_records` are left. `keep` is
    /// never evicted. Returns the number of records removed.
    pub fn evict_stale(
        &self,
        keep: Option<&str>,
        max_age: Duration,
        max_records: usize,
        now_ms: u64,
    ) -> Result<usize> {
        let cutoff = now_ms.saturating_sub(max_age.as_millis() as u64);

        let mut candidates: Vec<(u64, String)> = Vec::new();
        for item in self.profiles.iter() {
            let (key, value) = item?;
            let user_id = String::from_utf8_lossy(&key).to_string();
            if keep == Some(user_id.as_str()) {
                continue;
            }
            let record: ProfileRecord = rmp_serde::from_slice(&value)?;
            candidates.push((record.updated_at, user_id));
        }
        candidates.sort();

        let kept_total = self.profiles.len();
        let overflow = kept_total.saturating_sub(max_records);

        let mut removed = 0usize;
        for (index, (updated_at, user_id)) in candidates.iter().enumerate() {
            if *updated_at < cutoff || index < overflow {
                self.remove(user_id)?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, remaining = self.profiles.len(), "Evicted stale local profiles");
        }
        Ok(removed)
    }

    /// Flush changes to disk
    pub async fn flush(&self) -> Result<()> {
        self.profiles.flush_async().await?;
        self.usernames.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl BackingStore for LocalStore {
    fn id(&self) -> StoreId {
        StoreId::Local
    }

    async fn get_record(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        self.load(user_id)
    }

    async fn put_record(&self, record: &ProfileRecord) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(record)?;

        let mut used = self.usage();
        let previous = self.profiles.get(record.user_id.as_bytes())?;
        let previous_len = previous.as_ref().map(|b| b.len() as u64).unwrap_or(0);

        let projected = used.saturating_sub(previous_len) + bytes.len() as u64;
        if self.quota_bytes > 0 && projected > self.quota_bytes {
            return Err(SyncError::QuotaExceeded {
                used: *used,
                quota: self.quota_bytes,
            });
        }

        if let Some(previous) = previous {
            let old: ProfileRecord = rmp_serde::from_slice(&previous)?;
            if old.username != record.username {
                self.unindex(&old.username, &record.user_id)?;
            }
        }

        self.profiles.insert(record.user_id.as_bytes(), bytes.as_slice())?;
        if !record.username.is_empty() {
            self.usernames
                .insert(record.username.as_bytes(), record.user_id.as_bytes())?;
        }
        *used = projected;
        drop(used);

        debug!(user_id = %record.user_id, bytes = bytes.len(), "Local profile saved");
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<ProfileRecord>> {
        match self.usernames.get(username.as_bytes())? {
            Some(user_id) => self.load(&String::from_utf8_lossy(&user_id)),
            None => Ok(None),
        }
    }
}

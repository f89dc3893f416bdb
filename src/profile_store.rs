//! Profile store - the single entry point for reading and writing profiles
//!
//! Reads consult the in-memory cache first, then every backing store
//! concurrently; the freshest replica wins and stale stores are repaired in
//! the background. Writes are applied to the cache immediately (optimistic)
//! and fanned out through the durable writer.
//!
//! Conflict resolution is last-write-wins on the client clock. Two devices
//! editing the same profile concurrently can lose fields from one edit.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, ProfileCache};
use crate::error::{Result, SyncError};
use crate::profile::{AuthUser, ProfilePatch, ProfileRecord};
use crate::store::{StoreId, StoreSet};
use crate::sync::clock::LogicalClock;
use crate::sync::queue::SyncQueue;
use crate::sync::resolver::{self, Candidate};
use crate::sync::writer::{DurableWriter, WriteReport};

/// Acknowledgement of an accepted update
#[derive(Debug, Clone)]
pub struct Ack {
    /// The full record as written
    pub record: ProfileRecord,
    pub report: WriteReport,
}

/// Snapshot for status output
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub stores: Vec<StoreId>,
    pub cached_profiles: usize,
    pub queued_writes: usize,
}

pub struct ProfileStore {
    stores: StoreSet,
    writer: Arc<DurableWriter>,
    queue: Arc<SyncQueue>,
    cache: Mutex<ProfileCache>,
    clock: LogicalClock,
}

impl ProfileStore {
    pub fn new(stores: StoreSet, queue: Arc<SyncQueue>, cache_config: CacheConfig) -> Self {
        let writer = Arc::new(DurableWriter::new(stores.clone(), queue.clone()));
        info!(stores = ?stores.ids(), "ProfileStore initialized");
        Self {
            stores,
            writer,
            queue,
            cache: Mutex::new(ProfileCache::new(cache_config)),
            clock: LogicalClock::new(),
        }
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Freshest known copy of a profile. `Ok(None)` means no store has one.
    pub async fn get(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        if let Some(record) = self.cache.lock().await.get(user_id) {
            debug!(user_id, "Profile served from cache");
            return Ok(Some(record));
        }
        self.fetch(user_id).await.map(|(record, _)| record)
    }

    /// Read every store, resolve, cache the winner and repair stale stores.
    /// Also returns the stores that failed to answer.
    async fn fetch(&self, user_id: &str) -> Result<(Option<ProfileRecord>, BTreeSet<StoreId>)> {
        let reads = self.stores.ids().into_iter().map(|id| async move {
            (id, self.stores.attempt_get(id, user_id).await)
        });

        let mut answered: Vec<Candidate> = Vec::new();
        let mut failed = BTreeSet::new();
        for (id, result) in join_all(reads).await {
            match result {
                Ok(record) => answered.push((id, record)),
                Err(e) => {
                    debug!(store = %id, user_id, error = %e, "Store read failed");
                    failed.insert(id);
                }
            }
        }

        if answered.is_empty() {
            warn!(user_id, "No store answered profile read");
            return Err(SyncError::AllStoresFailed { failed });
        }

        let Some(winner) = resolver::resolve(&answered) else {
            debug!(user_id, unanswered = ?failed, "Profile not found in any answering store");
            return Ok((None, failed));
        };

        let stale = resolver::stale_stores(&answered, &winner);
        if !stale.is_empty() {
            self.spawn_repair(winner.clone(), stale);
        }

        let mut cache = self.cache.lock().await;
        cache.put(winner.clone());
        Ok((Some(cache.get(user_id).unwrap_or(winner)), failed))
    }

    /// Last known record to merge edits into. `Ok(None)` only when every
    /// configured store answered that it has no copy.
    async fn load_base(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        if let Some(record) = self.cache.lock().await.get(user_id) {
            return Ok(Some(record));
        }
        match self.fetch(user_id).await? {
            (Some(record), _) => Ok(Some(record)),
            (None, failed) if failed.is_empty() => Ok(None),
            (None, failed) => {
                warn!(user_id, unanswered = ?failed, "Current profile unreadable");
                Err(SyncError::BaseUnavailable {
                    user_id: user_id.to_string(),
                    failed,
                })
            }
        }
    }

    /// Write `record` to stores that returned an older or missing copy.
    /// Runs detached; failures end up in the retry queue.
    fn spawn_repair(&self, record: ProfileRecord, targets: Vec<StoreId>) {
        let writer = self.writer.clone();
        debug!(user_id = %record.user_id, targets = ?targets, "Scheduling repair-on-read");
        tokio::spawn(async move {
            let report = writer.write_to(&record, &targets).await;
            if !report.failed.is_empty() {
                debug!(user_id = %record.user_id, failed = ?report.failed, "Repair incomplete, queued");
            }
        });
    }

    /// Merge `patch` into the last known record and write it everywhere.
    ///
    /// The cache reflects the edit before any store is contacted and keeps it
    /// even when every store fails; in that case the error is returned and
    /// the write stays queued for retry.
    ///
    /// A blank record is used as the base only when every store reports no
    /// copy. With nothing cached and an unreachable store, the edit is
    /// refused (`BaseUnavailable` or `AllStoresFailed`) and nothing is written.
    pub async fn update(&self, user_id: &str, patch: ProfilePatch) -> Result<Ack> {
        patch.validate()?;

        let fetched = self.load_base(user_id).await?;

        if let Some(username) = patch.normalized_username() {
            let unchanged = fetched.as_ref().map(|r| r.username == username).unwrap_or(false);
            if !unchanged {
                self.ensure_username_available(user_id, &username).await?;
            }
        }

        let record = {
            let mut cache = self.cache.lock().await;
            let mut record = cache
                .get(user_id)
                .or(fetched)
                .unwrap_or_else(|| ProfileRecord::new(user_id));
            patch.apply(&mut record);
            record.updated_at = self.clock.tick_after(record.updated_at);
            cache.put(record.clone());
            record
        };

        self.persist(record).await
    }

    /// Create the default record for a first sign-in, or return the
    /// existing one.
    pub async fn initialize(&self, user: &AuthUser) -> Result<ProfileRecord> {
        if let Some(existing) = self.load_base(&user.user_id).await? {
            return Ok(existing);
        }

        let mut record = ProfileRecord::from_auth(user);
        if !record.username.is_empty() {
            if let Err(SyncError::UsernameTaken(name)) =
                self.ensure_username_available(&user.user_id, &record.username).await
            {
                info!(user_id = %user.user_id, username = %name, "Derived username taken, leaving unset");
                record.username.clear();
            }
        }
        record.updated_at = self.clock.tick();
        self.cache.lock().await.put(record.clone());

        info!(user_id = %user.user_id, "Creating default profile");
        self.persist(record).await.map(|ack| ack.record)
    }

    async fn persist(&self, record: ProfileRecord) -> Result<Ack> {
        let report = self.writer.write(&record).await;
        if report.is_total_failure() {
            warn!(user_id = %record.user_id, "Update reached no store; kept in cache and queued");
            return Err(report.into_error());
        }
        debug!(user_id = %record.user_id, updated_at = record.updated_at, "Profile updated");
        Ok(Ack { record, report })
    }

    /// Fails with `UsernameTaken` if any reachable store maps `username` to
    /// another user. Unreachable stores are skipped.
    pub async fn ensure_username_available(&self, user_id: &str, username: &str) -> Result<()> {
        let lookups = self.stores.ids().into_iter().map(|id| async move {
            (id, self.stores.attempt_find(id, username).await)
        });
        for (id, result) in join_all(lookups).await {
            match result {
                Ok(Some(owner)) if owner.user_id != user_id => {
                    debug!(store = %id, username, owner = %owner.user_id, "Username in use");
                    return Err(SyncError::UsernameTaken(username.to_string()));
                }
                Ok(_) => {}
                Err(e) => debug!(store = %id, username, error = %e, "Username lookup skipped"),
            }
        }
        Ok(())
    }

    /// Look a profile up by username across every store.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<ProfileRecord>> {
        let username = username.trim().to_lowercase();
        let lookups = self.stores.ids().into_iter().map(|id| {
            let username = username.as_str();
            async move { (id, self.stores.attempt_find(id, username).await) }
        });

        let mut answered: Vec<Candidate> = Vec::new();
        let mut failed = BTreeSet::new();
        for (id, result) in join_all(lookups).await {
            match result {
                Ok(found) => answered.push((id, found)),
                Err(e) => {
                    debug!(store = %id, username = %username, error = %e, "Username lookup failed");
                    failed.insert(id);
                }
            }
        }
        if answered.is_empty() {
            return Err(SyncError::AllStoresFailed { failed });
        }
        Ok(resolver::resolve(&answered))
    }

    /// Profiles are never deleted by this core.
    pub async fn delete(&self, user_id: &str) -> Result<()> {
        warn!(user_id, "Profile deletion requested but not supported");
        Err(SyncError::Unsupported("profile deletion"))
    }

    /// Forget the cached copy so the next `get` consults the stores.
    pub async fn invalidate(&self, user_id: &str) -> bool {
        self.cache.lock().await.invalidate(user_id)
    }

    pub async fn pin(&self, user_id: &str) {
        self.cache.lock().await.pin(user_id);
    }

    pub async fn unpin(&self, user_id: &str) {
        self.cache.lock().await.unpin(user_id);
    }

    pub async fn purge_expired(&self) -> usize {
        self.cache.lock().await.purge_expired()
    }

    pub async fn status(&self) -> StoreStatus {
        StoreStatus {
            stores: self.stores.ids(),
            cached_profiles: self.cache.lock().await.len(),
            queued_writes: self.queue.len(),
        }
    }
}

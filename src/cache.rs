//! In-memory profile cache
//!
//! Bounded by entry count (least recently used goes first) and by TTL.
//! Pinned entries (the signed-in user's own profile) are exempt from both.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::profile::ProfileRecord;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum cached profiles
    pub capacity: usize,
    /// Lifetime of an unpinned entry
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

struct CacheEntry {
    record: ProfileRecord,
    cached_at: Instant,
    last_access: u64,
}

pub struct ProfileCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    pinned: HashSet<String>,
    access_counter: u64,
}

impl ProfileCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            pinned: HashSet::new(),
            access_counter: 0,
        }
    }

    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    /// Cached record, unless missing or expired
    pub fn get(&mut self, user_id: &str) -> Option<ProfileRecord> {
        let expired = match self.entries.get(user_id) {
            None => return None,
            Some(entry) => {
                !self.pinned.contains(user_id) && entry.cached_at.elapsed() >= self.config.ttl
            }
        };
        if expired {
            debug!(user_id, "Cache entry expired");
            self.entries.remove(user_id);
            return None;
        }

        let access = self.next_access();
        let entry = self.entries.get_mut(user_id)?;
        entry.last_access = access;
        Some(entry.record.clone())
    }

    /// Cache `record` unless a newer copy is already held.
    /// Returns whether the entry was written.
    pub fn put(&mut self, record: ProfileRecord) -> bool {
        if let Some(existing) = self.entries.get(&record.user_id) {
            if existing.record.is_newer_than(&record) {
                return false;
            }
        }

        let access = self.next_access();
        self.entries.insert(
            record.user_id.clone(),
            CacheEntry {
                record,
                cached_at: Instant::now(),
                last_access: access,
            },
        );
        self.evict_overflow();
        true
    }

    pub fn invalidate(&mut self, user_id: &str) -> bool {
        self.entries.remove(user_id).is_some()
    }

    pub fn pin(&mut self, user_id: &str) {
        self.pinned.insert(user_id.to_string());
    }

    pub fn unpin(&mut self, user_id: &str) {
        self.pinned.remove(user_id);
    }

    pub fn is_pinned(&self, user_id: &str) -> bool {
        self.pinned.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired unpinned entries. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.config.ttl;
        let pinned = &self.pinned;
        let before = self.entries.len();
        self.entries
            .retain(|user_id, entry| pinned.contains(user_id) || entry.cached_at.elapsed() < ttl);
        before - self.entries.len()
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.config.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(user_id, _)| !self.pinned.contains(*user_id))
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(user_id, _)| user_id.clone());

            match victim {
                Some(user_id) => {
                    debug!(user_id = %user_id, "Cache entry evicted");
                    self.entries.remove(&user_id);
                }
                // Everything left is pinned
                None => break,
            }
        }
    }
}

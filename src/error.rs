//! Error types for profile-sync

use std::collections::BTreeSet;

use thiserror::Error;

use crate::store::StoreId;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A single backing store failed. Recovered inside the writer.
    #[error("Store {store} unavailable: {reason}")]
    StoreUnavailable { store: StoreId, reason: String },

    #[error("Store {store} timed out after {millis}ms")]
    Timeout { store: StoreId, millis: u64 },

    #[error("Local quota exceeded: {used} of {quota} bytes in use")]
    QuotaExceeded { used: u64, quota: u64 },

    /// Every configured store rejected the write (or read).
    #[error("All stores failed: {}", format_stores(failed))]
    AllStoresFailed { failed: BTreeSet<StoreId> },

    /// Nothing cached, no store returned the profile, and some store
    /// could not answer. The current copy may live there.
    #[error("Current profile for {user_id} unreadable; no answer from {}", format_stores(failed))]
    BaseUnavailable {
        user_id: String,
        failed: BTreeSet<StoreId>,
    },

    #[error("Queued write for {user_id} on {store} dropped after {attempts} attempts")]
    RetryCeilingExceeded {
        store: StoreId,
        user_id: String,
        attempts: u32,
    },

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn unavailable(store: StoreId, reason: impl ToString) -> Self {
        SyncError::StoreUnavailable {
            store,
            reason: reason.to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for SyncError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SyncError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

fn format_stores(stores: &BTreeSet<StoreId>) -> String {
    stores
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for profile-sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

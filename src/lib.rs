//! profile-sync: redundant persistence and sync core for user profiles
//!
//! A profile is written to every configured backing store at once (local
//! sled replica, one or two remote databases). Reads take the freshest
//! replica by `updated_at` and quietly repair the stale ones. Writes that
//! miss a store are kept in a durable retry queue and drained when
//! connectivity returns.
//!
//! ```text
//! Session ──► ProfileStore ──► ProfileCache (optimistic, LRU + TTL)
//!                  │
//!                  ├── DurableWriter ──► StoreSet [local, primary, secondary]
//!                  │         └── failures ──► SyncQueue (sled, coalescing)
//!                  └── resolver (last-write-wins) + repair-on-read
//!
//! SyncCoordinator: drains SyncQueue on reconnect and on a timer
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod profile;
pub mod profile_store;
pub mod session;
pub mod store;
pub mod sync;

pub use cache::{CacheConfig, ProfileCache};
pub use config::Config;
pub use error::{Result, SyncError};
pub use profile::{AuthUser, ContactInfo, Platform, ProfilePatch, ProfileRecord, Theme};
pub use profile_store::{Ack, ProfileStore, StoreStatus};
pub use session::Session;
pub use store::{BackingStore, StoreId, StoreSet};
pub use sync::{DurableWriter, SyncCoordinator, SyncQueue, WriteReport};

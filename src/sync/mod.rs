//! Sync engine - redundant writes and freshness reconciliation
//!
//! Handles:
//! - Concurrent fan-out writes to every backing store
//! - Freshest-replica resolution by `updated_at`
//! - Durable retry queue for failed writes
//! - Drain scheduling on connectivity and timer

pub mod clock;
pub mod coordinator;
pub mod queue;
pub mod resolver;
pub mod writer;

// Re-exports
pub use clock::LogicalClock;
pub use coordinator::{probe_connectivity, RetentionPolicy, SyncCoordinator};
pub use queue::{DrainReport, QueuedWrite, SyncQueue};
pub use resolver::{resolve, Candidate};
pub use writer::{DurableWriter, WriteReport};

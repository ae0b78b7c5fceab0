//! Consistency coordinator for the dual-store pipeline.
//!
//! The [`Coordinator`] drives the ingest protocol (embed, store vectors,
//! store rows, link) across the embedding gateway and the two stores, and
//! answers similarity searches joined back to relational detail. It is the
//! only component that knows both id spaces; the stores never reference each
//! other.
//!
//! Crash consistency comes from a write-ahead journal ([`IngestJournal`]):
//! each protocol step is journaled before the next begins, and
//! [`Coordinator::recover`] replays or compensates batches the journal shows
//! as unfinished.

pub mod coordinator;
pub mod journal;
pub mod lock;
pub mod types;

#[cfg(test)]
mod tests;

pub use coordinator::{Coordinator, CoordinatorOptions, RecoveryReport, StoreStats};
pub use journal::{IngestJournal, JournalEntry, JournalStage, PendingBatch};
pub use lock::{KeyGuard, KeyLock};
pub use types::{BatchReceipt, IngestFailure, IngestStage, SearchHit, SearchResponse};

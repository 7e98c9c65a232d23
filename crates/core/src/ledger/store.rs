//! Ledger store boundary.
//!
//! The store owns entries and checkpoints. Both are addressed by
//! `(principal, key)` and returned in ascending key order, which is newest
//! first.

use tally_shared::Principal;
use thiserror::Error;

use super::checkpoint::Checkpoint;
use super::entry::LedgerEntry;
use super::keys::TimeKey;

/// Ledger store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An entry with the same `(principal, key)` already exists.
    #[error("duplicate entry key {0}")]
    Duplicate(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a corrupt record error.
    #[must_use]
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The record was written.
    Created,
    /// A record with the same key was already present; nothing was written.
    AlreadyExists,
}

/// Repository trait for ledger persistence.
///
/// Implemented in memory by [`crate::adapters::memory::MemoryLedgerStore`]
/// and over PostgreSQL by the db crate. Key ranges are inclusive on both ends
/// with `from <= to`.
pub trait LedgerStore: Send + Sync {
    /// Persist a batch of entries, all or nothing.
    ///
    /// Fails with [`StoreError::Duplicate`] if any `(principal, key)` exists.
    fn create_entries(
        &self,
        entries: &[LedgerEntry],
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Entries of a principal with keys in `[from, to]`, newest first.
    fn entries_in_range(
        &self,
        principal: &Principal,
        from: TimeKey,
        to: TimeKey,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = Result<Vec<LedgerEntry>, StoreError>> + Send;

    /// The oldest entry of a principal.
    fn earliest_entry(
        &self,
        principal: &Principal,
    ) -> impl std::future::Future<Output = Result<Option<LedgerEntry>, StoreError>> + Send;

    /// Persist a checkpoint unless one exists for the same `(principal, key)`.
    fn create_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<CreateOutcome, StoreError>> + Send;

    /// The checkpoint with exactly this key.
    fn checkpoint_by_key(
        &self,
        principal: &Principal,
        key: TimeKey,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, StoreError>> + Send;

    /// Checkpoints of a principal with keys in `[from, to]`, newest first.
    fn checkpoints_in_range(
        &self,
        principal: &Principal,
        from: TimeKey,
        to: TimeKey,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, StoreError>> + Send;
}

/// The most recent checkpoint of a principal.
pub(crate) async fn latest_checkpoint<S: LedgerStore>(
    store: &S,
    principal: &Principal,
) -> Result<Option<Checkpoint>, StoreError> {
    Ok(store
        .checkpoints_in_range(principal, TimeKey::NEWEST, TimeKey::OLDEST, Some(1))
        .await?
        .into_iter()
        .next())
}

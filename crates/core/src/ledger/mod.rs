//! Append-only ledger with daily checkpoints.
//!
//! This module implements the ledger engine:
//! - Reverse-chronological time keys
//! - Entry append with write-through day counters
//! - Balance queries from the latest checkpoint plus day counters
//! - Frozen holds
//! - Daily checkpoint compaction with drift detection and auditors

pub mod append;
pub mod audit;
pub mod balance;
pub mod cache;
pub mod checkpoint;
pub mod clock;
pub mod compactor;
pub mod day;
pub mod drift;
pub mod entry;
pub mod error;
pub mod hold;
pub mod keys;
pub mod service;
pub mod store;

#[cfg(test)]
mod keys_props;
#[cfg(test)]
mod reconcile_props;

pub use append::AppendEngine;
pub use audit::{AuditError, Auditor, AuditorRegistry, ContinuityAuditor, EntrySumAuditor};
pub use balance::{Balance, BalanceQuery, Baseline, BaselineSource, EntryPage, EntryPageRequest};
pub use cache::{CacheError, CounterCache, FROZEN_BUCKET};
pub use checkpoint::Checkpoint;
pub use clock::{Clock, ManualClock, SystemClock};
pub use compactor::{CompactionReport, Compactor, StopReason, SweepOutcome};
pub use drift::{DayDrift, DriftPolicy};
pub use entry::{DayTotals, EntryRequest, LedgerEntry};
pub use error::LedgerError;
pub use hold::HoldManager;
pub use keys::{KeyError, KeyGenerator, TimeKey};
pub use service::LedgerService;
pub use store::{CreateOutcome, LedgerStore, StoreError};

//! Ready-made implementations of the ledger boundaries.

pub mod memory;

pub use memory::{MemoryCounterCache, MemoryLedgerStore};

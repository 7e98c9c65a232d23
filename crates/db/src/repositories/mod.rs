//! Repository implementations of the ledger persistence traits.
//!
//! Repositories hide the `SeaORM` details from the engine, which only sees
//! the `LedgerStore` and `CounterCache` traits from the core crate.

pub mod counter_cache;
pub mod ledger_store;

pub use counter_cache::PgCounterCache;
pub use ledger_store::PgLedgerStore;

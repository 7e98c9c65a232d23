//! `SeaORM` entity definitions.

pub mod ledger_checkpoints;
pub mod ledger_counters;
pub mod ledger_entries;

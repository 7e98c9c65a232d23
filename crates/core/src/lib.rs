//! Core ledger engine for Tally.
//!
//! This crate contains the ledger logic with ZERO web or database dependencies.
//! Persistence and the counter cache are reached through the traits in
//! [`ledger::store`] and [`ledger::cache`]; the `tally-db` crate implements
//! them over PostgreSQL and [`adapters::memory`] implements them in memory.
//!
//! # Modules
//!
//! - `ledger` - Append-only entries, checkpoints, balances, holds, compaction
//! - `adapters` - In-memory store and counter cache

pub mod adapters;
pub mod ledger;

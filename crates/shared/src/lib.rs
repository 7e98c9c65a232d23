//! Shared types, errors, and configuration for Tally.
//!
//! This crate provides common types used across all other crates:
//! - Money with fixed decimal precision and half-away-from-zero rounding
//! - Principal identifiers
//! - Cursor pagination types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, CompactorConfig, DatabaseConfig, DriftPolicy, LedgerSettings};
pub use error::TypeError;
pub use types::{Money, Principal};

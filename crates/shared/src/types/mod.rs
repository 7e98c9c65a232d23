//! Common types used across the ledger crates.

pub mod money;
pub mod pagination;
pub mod principal;

pub use money::{MONEY_SCALE, Money, round_money};
pub use pagination::{PageRequest, PageResponse};
pub use principal::Principal;

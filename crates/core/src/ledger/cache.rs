//! Counter cache boundary.
//!
//! Counters are decimal values addressed by `(bucket, principal)`. Day
//! counters use [`super::day::day_bucket`]; holds use [`FROZEN_BUCKET`].
//! All mutation goes through `increment` and `compare_and_swap`, which
//! implementations must perform atomically.

use std::time::Duration;

use rust_decimal::Decimal;
use tally_shared::Principal;
use thiserror::Error;

/// Bucket holding a principal's frozen amount.
pub const FROZEN_BUCKET: &str = "frozen";

/// Counter cache errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A cached value could not be decoded.
    #[error("corrupt counter: {0}")]
    Corrupt(String),
}

impl CacheError {
    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a corrupt counter error.
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

/// Key/value counter store with atomic primitives.
pub trait CounterCache: Send + Sync {
    /// Current value, `None` when absent or expired.
    fn get(
        &self,
        bucket: &str,
        principal: &Principal,
    ) -> impl std::future::Future<Output = Result<Option<Decimal>, CacheError>> + Send;

    /// Stores `value`. Without `overwrite` an existing value is kept and
    /// `false` is returned.
    fn set(
        &self,
        bucket: &str,
        principal: &Principal,
        value: Decimal,
        overwrite: bool,
        expiry: Option<Duration>,
    ) -> impl std::future::Future<Output = Result<bool, CacheError>> + Send;

    /// Removes the value, if any.
    fn delete(
        &self,
        bucket: &str,
        principal: &Principal,
    ) -> impl std::future::Future<Output = Result<(), CacheError>> + Send;

    /// Atomically adds `delta` and returns the new value. An absent counter
    /// starts at zero and receives `expiry`.
    fn increment(
        &self,
        bucket: &str,
        principal: &Principal,
        delta: Decimal,
        expiry: Option<Duration>,
    ) -> impl std::future::Future<Output = Result<Decimal, CacheError>> + Send;

    /// Atomically replaces `expected` with `new`, where `None` means absent.
    /// Returns `false` without writing if the current value differs.
    fn compare_and_swap(
        &self,
        bucket: &str,
        principal: &Principal,
        expected: Option<Decimal>,
        new: Option<Decimal>,
    ) -> impl std::future::Future<Output = Result<bool, CacheError>> + Send;
}

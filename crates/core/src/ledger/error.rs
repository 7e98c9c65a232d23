//! Ledger error types.
//!
//! Validation errors are raised before any I/O and leave no side effect.
//! Store and cache failures are wrapped and keep their retryability.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tally_shared::TypeError;
use thiserror::Error;

use super::audit::AuditError;
use super::cache::CacheError;
use super::keys::{KeyError, TimeKey};
use super::store::StoreError;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Principal is empty after trimming.
    #[error("Principal must not be empty")]
    EmptyPrincipal,

    /// Principal is otherwise unusable.
    #[error("Invalid principal: {0}")]
    InvalidPrincipal(String),

    /// Hold amounts cannot be negative.
    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(Decimal),

    /// Unfreeze would take the hold below zero.
    #[error("Cannot release {requested} from a hold of {held}")]
    InsufficientHold {
        /// Amount asked to release.
        requested: Decimal,
        /// Amount currently held.
        held: Decimal,
    },

    /// Supplied entry key is not a valid time key.
    #[error("Invalid entry key: {0}")]
    InvalidKey(#[from] KeyError),

    /// Supplied entry key lies in the future.
    #[error("Entry key {key} is in the future (now {now})")]
    FutureEntry {
        /// The offending key.
        key: TimeKey,
        /// Clock reading at validation time.
        now: DateTime<Utc>,
    },

    /// Entry falls on a day already covered by a checkpoint.
    #[error("Day {day} is closed, latest checkpoint covers {checkpoint_day}")]
    DayClosed {
        /// Day of the rejected entry.
        day: NaiveDate,
        /// Day of the principal's latest checkpoint.
        checkpoint_day: NaiveDate,
    },

    /// Entry key already used for this principal.
    #[error("Duplicate entry key: {0}")]
    DuplicateKey(String),

    // ========== Compaction Errors ==========
    /// Day counter disagrees with the day's entries and the policy halts.
    #[error("Counter drift for {principal} on {day}: entries sum to {expected}, counter holds {observed}")]
    DriftDetected {
        /// Principal being compacted.
        principal: String,
        /// Drifting day.
        day: NaiveDate,
        /// Sum of the day's entries.
        expected: Decimal,
        /// Counter value.
        observed: Decimal,
    },

    /// An auditor rejected a candidate checkpoint.
    #[error("Auditor {auditor} rejected checkpoint for {day}: {source}")]
    AuditFailed {
        /// Name of the failing auditor.
        auditor: String,
        /// Day of the rejected checkpoint.
        day: NaiveDate,
        /// The auditor's error.
        #[source]
        source: AuditError,
    },

    // ========== Concurrency Errors ==========
    /// Compare-and-swap lost too many races.
    #[error("Concurrent modification detected, please retry")]
    ConcurrentModification,

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// No generated key is left on the current day; retry once it rolls over.
    #[error("Entry keys for {day} are exhausted, please retry")]
    KeysExhausted {
        /// Day whose keys ran out.
        day: NaiveDate,
    },

    // ========== Infrastructure Errors ==========
    /// Ledger store failure.
    #[error("Ledger store error: {0}")]
    Store(#[source] StoreError),

    /// Counter cache failure.
    #[error("Counter cache error: {0}")]
    Cache(#[from] CacheError),

    /// Settings cannot be applied.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyPrincipal => "EMPTY_PRINCIPAL",
            Self::InvalidPrincipal(_) => "INVALID_PRINCIPAL",
            Self::NegativeAmount(_) => "NEGATIVE_AMOUNT",
            Self::InsufficientHold { .. } => "INSUFFICIENT_HOLD",
            Self::InvalidKey(_) => "INVALID_KEY",
            Self::FutureEntry { .. } => "FUTURE_ENTRY",
            Self::DayClosed { .. } => "DAY_CLOSED",
            Self::DuplicateKey(_) => "DUPLICATE_KEY",
            Self::DriftDetected { .. } => "DRIFT_DETECTED",
            Self::AuditFailed { .. } => "AUDIT_FAILED",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::Cancelled => "CANCELLED",
            Self::KeysExhausted { .. } => "KEYS_EXHAUSTED",
            Self::Store(_) => "STORE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Returns true if this error is a caller input problem.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyPrincipal
                | Self::InvalidPrincipal(_)
                | Self::NegativeAmount(_)
                | Self::InsufficientHold { .. }
                | Self::InvalidKey(_)
                | Self::FutureEntry { .. }
                | Self::DayClosed { .. }
                | Self::DuplicateKey(_)
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification | Self::KeysExhausted { .. } => true,
            Self::Store(e) => e.is_retryable(),
            Self::Cache(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<TypeError> for LedgerError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::EmptyPrincipal => Self::EmptyPrincipal,
            other @ TypeError::PrincipalTooLong { .. } => Self::InvalidPrincipal(other.to_string()),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(key) => Self::DuplicateKey(key),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::EmptyPrincipal.error_code(), "EMPTY_PRINCIPAL");
        assert_eq!(
            LedgerError::NegativeAmount(dec!(-1)).error_code(),
            "NEGATIVE_AMOUNT"
        );
        assert_eq!(LedgerError::Cancelled.error_code(), "CANCELLED");
        assert_eq!(
            LedgerError::InsufficientHold {
                requested: dec!(5),
                held: dec!(1)
            }
            .error_code(),
            "INSUFFICIENT_HOLD"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LedgerError::ConcurrentModification.is_retryable());
        assert!(LedgerError::from(StoreError::unavailable("down")).is_retryable());
        assert!(LedgerError::from(CacheError::unavailable("down")).is_retryable());
        assert!(!LedgerError::from(StoreError::corrupt("bad row")).is_retryable());
        assert!(!LedgerError::EmptyPrincipal.is_retryable());
        assert!(!LedgerError::Cancelled.is_retryable());

        let exhausted = LedgerError::KeysExhausted {
            day: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        };
        assert!(exhausted.is_retryable());
        assert!(!exhausted.is_validation());
        assert_eq!(exhausted.error_code(), "KEYS_EXHAUSTED");
    }

    #[test]
    fn test_duplicate_store_error_maps_to_duplicate_key() {
        let err = LedgerError::from(StoreError::Duplicate("000000000001".to_string()));
        assert!(matches!(err, LedgerError::DuplicateKey(ref k) if k == "000000000001"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_type_error_conversion() {
        assert!(matches!(
            LedgerError::from(TypeError::EmptyPrincipal),
            LedgerError::EmptyPrincipal
        ));
        assert!(matches!(
            LedgerError::from(TypeError::PrincipalTooLong { len: 300, max: 128 }),
            LedgerError::InvalidPrincipal(_)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::DayClosed {
            day: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            checkpoint_day: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Day 2024-01-02 is closed, latest checkpoint covers 2024-01-05"
        );
    }
}

//! Ledger entries.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::{Money, Principal};

use super::keys::TimeKey;

/// Request to record one signed movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequest {
    /// Raw principal, trimmed on append.
    pub principal: String,
    /// Signed amount; rounded to money precision on append.
    pub delta: Decimal,
    /// Caller-defined reason code.
    #[serde(default)]
    pub reason: i32,
    /// Free-text remark.
    #[serde(default)]
    pub remark: String,
    /// External reference.
    #[serde(default)]
    pub reference: Option<String>,
    /// Correlation identifier.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Caller-supplied time key; generated from the clock when absent.
    #[serde(default)]
    pub key: Option<String>,
}

impl EntryRequest {
    /// Creates a request with empty metadata.
    #[must_use]
    pub fn new(principal: impl Into<String>, delta: Decimal) -> Self {
        Self {
            principal: principal.into(),
            delta,
            reason: 0,
            remark: String::new(),
            reference: None,
            correlation_id: None,
            key: None,
        }
    }

    /// Sets the reason code.
    #[must_use]
    pub fn with_reason(mut self, reason: i32) -> Self {
        self.reason = reason;
        self
    }

    /// Sets the remark.
    #[must_use]
    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    /// Sets the external reference.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Sets the correlation identifier.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Supplies the entry key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// An immutable, persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Identifier; also encodes when the entry occurred.
    pub key: TimeKey,
    /// Owner of the entry.
    pub principal: Principal,
    /// Signed amount.
    pub delta: Money,
    /// Caller-defined reason code.
    pub reason: i32,
    /// Free-text remark.
    pub remark: String,
    /// External reference.
    pub reference: Option<String>,
    /// Correlation identifier.
    pub correlation_id: Option<String>,
}

impl LedgerEntry {
    /// When the entry occurred.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.key.instant()
    }

    /// UTC calendar day of the entry.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.occurred_at().date_naive()
    }
}

/// Credits and debits of a set of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DayTotals {
    /// Sum of positive deltas.
    pub credits: Money,
    /// Sum of negative deltas.
    pub debits: Money,
    /// Number of entries.
    pub count: u64,
}

impl DayTotals {
    /// Sums the given entries.
    #[must_use]
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut totals, entry| {
            if entry.delta.is_negative() {
                totals.debits += entry.delta;
            } else {
                totals.credits += entry.delta;
            }
            totals.count += 1;
            totals
        })
    }

    /// `credits + debits`.
    #[must_use]
    pub fn net(&self) -> Money {
        self.credits + self.debits
    }
}

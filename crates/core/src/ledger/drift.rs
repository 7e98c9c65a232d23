//! Drift between day counters and the entries they summarize.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use tally_shared::config::DriftPolicy;

/// A day whose counter disagreed with the sum of its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayDrift {
    /// The calendar day.
    pub day: NaiveDate,
    /// Sum of the day's entry deltas.
    pub expected: Decimal,
    /// Counter value observed, zero when absent.
    pub observed: Decimal,
}

impl DayDrift {
    /// `expected - observed`.
    #[must_use]
    pub fn diff(&self) -> Decimal {
        self.expected - self.observed
    }
}

/// Compares a day's entry total with its counter, returning the drift if any.
#[must_use]
pub fn detect(day: NaiveDate, expected: Decimal, observed: Decimal) -> Option<DayDrift> {
    (expected != observed).then_some(DayDrift {
        day,
        expected,
        observed,
    })
}

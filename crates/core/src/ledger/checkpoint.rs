//! Daily checkpoints.
//!
//! A checkpoint freezes a principal's cumulative balance at the last
//! millisecond of a UTC day. Each one is derived from its predecessor:
//! `balance = opening_balance + credits + debits`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tally_shared::{Money, Principal};

use super::day;
use super::entry::DayTotals;
use super::keys::{KeyError, TimeKey};

/// Balance snapshot at the end of a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Owner of the checkpoint.
    pub principal: Principal,
    /// Key of the end-of-day instant.
    pub key: TimeKey,
    /// Balance of the previous checkpoint.
    pub opening_balance: Money,
    /// Cumulative balance at the end of the day.
    pub balance: Money,
    /// Sum of positive deltas during the day.
    pub credits: Money,
    /// Sum of negative deltas during the day.
    pub debits: Money,
    /// Number of entries folded.
    pub entry_count: u64,
    /// When the checkpoint was computed.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Zero-balance checkpoint closing `day`.
    ///
    /// # Errors
    ///
    /// Returns an error if the end of `day` cannot be encoded.
    pub fn bootstrap(principal: Principal, day: NaiveDate, created_at: DateTime<Utc>) -> Result<Self, KeyError> {
        Ok(Self {
            principal,
            key: TimeKey::encode(day::end_of(day))?,
            opening_balance: Money::zero(),
            balance: Money::zero(),
            credits: Money::zero(),
            debits: Money::zero(),
            entry_count: 0,
            created_at,
        })
    }

    /// The checkpoint closing `day`, which must follow this one.
    ///
    /// # Errors
    ///
    /// Returns an error if the end of `day` cannot be encoded.
    pub fn next(&self, day: NaiveDate, totals: &DayTotals, created_at: DateTime<Utc>) -> Result<Self, KeyError> {
        Ok(Self {
            principal: self.principal.clone(),
            key: TimeKey::encode(day::end_of(day))?,
            opening_balance: self.balance,
            balance: self.balance + totals.credits + totals.debits,
            credits: totals.credits,
            debits: totals.debits,
            entry_count: totals.count,
            created_at,
        })
    }

    /// Last millisecond covered.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.key.instant()
    }

    /// Calendar day closed by this checkpoint.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.end().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_bootstrap_is_zero_at_end_of_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let cp = Checkpoint::bootstrap(Principal::parse("p").unwrap(), date(9), now).unwrap();
        assert!(cp.balance.is_zero());
        assert!(cp.opening_balance.is_zero());
        assert_eq!(cp.entry_count, 0);
        assert_eq!(cp.day(), date(9));
        assert_eq!(cp.end().hour(), 23);
        assert_eq!(cp.end().timestamp_subsec_millis(), 999);
    }

    #[test]
    fn test_next_folds_totals() {
        let now = Utc.with_ymd_and_hms(2024, 3, 12, 12, 0, 0).unwrap();
        let first = Checkpoint::bootstrap(Principal::parse("p").unwrap(), date(9), now).unwrap();
        let totals = DayTotals {
            credits: Money::new(dec!(150)),
            debits: Money::new(dec!(-20.5)),
            count: 3,
        };
        let second = first.next(date(10), &totals, now).unwrap();
        assert_eq!(second.opening_balance, first.balance);
        assert_eq!(second.balance.amount(), dec!(129.50));
        assert_eq!(second.entry_count, 3);
        assert_eq!(second.day(), date(10));
        assert!(second.key < first.key);
    }
}

//! Balance queries.
//!
//! A balance as of a day is the nearest checkpoint at or before that day
//! plus the day counters of every later day up to it. Only counters are
//! read on the hot path; entries are never rescanned.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tally_shared::types::{PageRequest, PageResponse};
use tally_shared::{Money, Principal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::CounterCache;
use super::checkpoint::Checkpoint;
use super::clock::Clock;
use super::day::{self, day_bucket};
use super::entry::LedgerEntry;
use super::error::LedgerError;
use super::hold::HoldManager;
use super::keys::TimeKey;
use super::store::LedgerStore;

/// Cursor request for entry history; the cursor is an entry key.
pub type EntryPageRequest = PageRequest;

/// One page of entry history, newest first.
pub type EntryPage = PageResponse<LedgerEntry>;

/// Where a balance computation started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// A persisted checkpoint.
    Checkpoint,
    /// A zero balance before any entry; the principal has no checkpoint yet.
    Synthesized,
}

/// Starting point of a balance computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    /// Last instant covered by the baseline.
    pub end: DateTime<Utc>,
    /// Balance at `end`.
    pub balance: Money,
    /// Origin of the baseline.
    pub source: BaselineSource,
}

impl Baseline {
    fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            end: checkpoint.end(),
            balance: checkpoint.balance,
            source: BaselineSource::Checkpoint,
        }
    }

    fn synthesized(day: NaiveDate) -> Self {
        Self {
            end: day::end_of(day),
            balance: Money::zero(),
            source: BaselineSource::Synthesized,
        }
    }
}

/// A principal's balance at the end of a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// The principal.
    pub principal: Principal,
    /// End of the queried day.
    pub as_of: DateTime<Utc>,
    /// Sum of all entries up to `as_of`.
    pub total: Money,
    /// Current hold.
    pub frozen: Money,
    /// `total - frozen`.
    pub available: Money,
    /// Where the computation started.
    pub baseline: Baseline,
}

/// Answers balance and history queries.
#[derive(Debug)]
pub struct BalanceQuery<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    holds: HoldManager<C>,
    window_days: u32,
}

impl<S: LedgerStore, C: CounterCache> BalanceQuery<S, C> {
    /// Creates a query engine scanning `window_days` back for checkpoints.
    #[must_use]
    pub fn new(store: Arc<S>, cache: Arc<C>, clock: Arc<dyn Clock>, holds: HoldManager<C>, window_days: u32) -> Self {
        Self {
            store,
            cache,
            clock,
            holds,
            window_days,
        }
    }

    /// Balance at the end of the UTC day containing `as_of`.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPrincipal`, `InvalidKey` when the day ends after the key
    /// anchor, `Cancelled`, or a store/cache error. Days older than the
    /// oldest encodable key cannot hold entries and report a zero total.
    pub async fn balance(
        &self,
        principal: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Balance, LedgerError> {
        let principal = Principal::parse(principal)?;
        let as_of = day::end_of_day(as_of);
        if as_of < TimeKey::OLDEST.instant() {
            let frozen = self.holds.frozen_of(&principal).await?;
            debug!(principal = %principal, %as_of, "Balance requested before the key range");
            return Ok(Balance {
                principal,
                as_of,
                total: Money::zero(),
                frozen,
                available: -frozen,
                baseline: Baseline::synthesized(as_of.date_naive()),
            });
        }
        TimeKey::encode(as_of)?;
        let baseline = self.baseline(&principal, as_of).await?;

        let days: Vec<NaiveDate> = day::days_after(baseline.end.date_naive(), as_of.date_naive()).collect();
        if days.len() > self.window_days as usize {
            warn!(
                principal = %principal,
                days = days.len(),
                window = self.window_days,
                "Balance reads more day counters than the query window; compaction is lagging"
            );
        }

        let mut total = baseline.balance;
        for day in days {
            if cancel.is_cancelled() {
                return Err(LedgerError::Cancelled);
            }
            if let Some(delta) = self.cache.get(&day_bucket(day), &principal).await? {
                total += Money::new(delta);
            }
        }

        let frozen = self.holds.frozen_of(&principal).await?;
        debug!(principal = %principal, %as_of, %total, %frozen, "Balance computed");
        Ok(Balance {
            principal,
            as_of,
            total,
            frozen,
            available: total - frozen,
            baseline,
        })
    }

    /// Balance as of the clock's current instant.
    ///
    /// # Errors
    ///
    /// See [`Self::balance`].
    pub async fn balance_now(&self, principal: &str, cancel: &CancellationToken) -> Result<Balance, LedgerError> {
        self.balance(principal, self.clock.now(), cancel).await
    }

    /// Entry history, newest first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for a malformed cursor, `Cancelled`, or a store
    /// error.
    pub async fn entries(
        &self,
        principal: &str,
        page: &EntryPageRequest,
        cancel: &CancellationToken,
    ) -> Result<EntryPage, LedgerError> {
        let principal = Principal::parse(principal)?;
        let from = match page.after.as_deref() {
            Some(cursor) => match TimeKey::parse(cursor)?.successor() {
                Some(key) => key,
                None => return Ok(PageResponse::from_overfetch(Vec::new(), page.limit(), cursor_of)),
            },
            None => TimeKey::NEWEST,
        };
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        let limit = page.limit();
        let items = self
            .store
            .entries_in_range(&principal, from, TimeKey::OLDEST, Some(limit + 1))
            .await?;
        Ok(PageResponse::from_overfetch(items, limit, cursor_of))
    }

    /// Checkpoints closing days between `from` and `to`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` when a bound cannot be encoded, `Cancelled`, or
    /// a store error.
    pub async fn checkpoints(
        &self,
        principal: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Checkpoint>, LedgerError> {
        let principal = Principal::parse(principal)?;
        if from > to {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        let newest = TimeKey::encode(to)?;
        let oldest = TimeKey::encode(from)?;
        Ok(self.store.checkpoints_in_range(&principal, newest, oldest, None).await?)
    }

    async fn baseline(&self, principal: &Principal, as_of: DateTime<Utc>) -> Result<Baseline, LedgerError> {
        let as_of_day = as_of.date_naive();

        if as_of_day == self.clock.now().date_naive() {
            if let Some(yesterday) = as_of_day.pred_opt() {
                let key = TimeKey::encode(day::end_of(yesterday))?;
                if let Some(checkpoint) = self.store.checkpoint_by_key(principal, key).await? {
                    return Ok(Baseline::from_checkpoint(&checkpoint));
                }
            }
        }

        let as_of_key = TimeKey::encode(as_of)?;
        let window_start = as_of - TimeDelta::days(i64::from(self.window_days));
        let window_key = TimeKey::encode(window_start).unwrap_or(TimeKey::OLDEST);
        let mut nearest = self
            .store
            .checkpoints_in_range(principal, as_of_key, window_key, Some(1))
            .await?;
        if nearest.is_empty() && window_key != TimeKey::OLDEST {
            nearest = self
                .store
                .checkpoints_in_range(principal, as_of_key, TimeKey::OLDEST, Some(1))
                .await?;
        }
        if let Some(checkpoint) = nearest.first() {
            return Ok(Baseline::from_checkpoint(checkpoint));
        }

        let first_day = match self.store.earliest_entry(principal).await? {
            Some(entry) if entry.day() <= as_of_day => entry.day(),
            _ => as_of_day,
        };
        let day = first_day.pred_opt().unwrap_or(first_day);
        Ok(Baseline::synthesized(day))
    }
}

fn cursor_of(entry: &LedgerEntry) -> String {
    entry.key.to_string()
}

//! Entry append with write-through day counters.
//!
//! Entries are validated, persisted as one batch, and only then folded into
//! the day counters with atomic increments. The store is the source of
//! truth: a failed counter increment is logged and later surfaces as drift
//! during compaction.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tally_shared::{Money, Principal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::cache::CounterCache;
use super::clock::Clock;
use super::day::day_bucket;
use super::entry::{EntryRequest, LedgerEntry};
use super::error::LedgerError;
use super::keys::{KeyError, KeyGenerator, TimeKey};
use super::store::{LedgerStore, StoreError, latest_checkpoint};

/// Records ledger entries.
#[derive(Debug)]
pub struct AppendEngine<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    keys: Arc<KeyGenerator>,
    counter_ttl: Option<Duration>,
}

impl<S: LedgerStore, C: CounterCache> AppendEngine<S, C> {
    /// Creates an append engine.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        cache: Arc<C>,
        clock: Arc<dyn Clock>,
        keys: Arc<KeyGenerator>,
        counter_ttl: Option<Duration>,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            keys,
            counter_ttl,
        }
    }

    /// Validates and persists a batch of entries.
    ///
    /// An empty batch is a no-op. Either every entry is persisted or none is.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any I/O if a principal is empty, a
    /// supplied key is malformed, in the future, on a closed day, or repeated
    /// within the batch. Returns `KeysExhausted` when generated keys would
    /// spill into the next UTC day. Store failures are returned without
    /// touching any counter.
    pub async fn append(
        &self,
        requests: Vec<EntryRequest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut entries = Vec::with_capacity(requests.len());
        let mut supplied = HashSet::new();
        for request in requests {
            let principal = Principal::parse(&request.principal)?;
            let key = match request.key.as_deref() {
                Some(raw) => {
                    let key = TimeKey::parse(raw.trim())?;
                    if key.instant() > now {
                        return Err(LedgerError::FutureEntry { key, now });
                    }
                    supplied.insert(principal.clone());
                    key
                }
                None => self.keys.next(now).map_err(|e| match e {
                    KeyError::DayExhausted(day) => LedgerError::KeysExhausted { day },
                    other => other.into(),
                })?,
            };
            entries.push(LedgerEntry {
                key,
                principal,
                delta: Money::new(request.delta),
                reason: request.reason,
                remark: request.remark,
                reference: request.reference,
                correlation_id: request.correlation_id,
            });
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert((&entry.principal, entry.key)) {
                return Err(LedgerError::DuplicateKey(entry.key.to_string()));
            }
        }

        for principal in &supplied {
            self.reject_closed_days(principal, &entries).await?;
        }

        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        if let Err(e) = self.store.create_entries(&entries).await {
            error!(error = %e, count = entries.len(), "Failed to persist ledger entries");
            return Err(e.into());
        }

        self.bump_day_counters(&entries).await;
        self.report_late_closed_days(&supplied, &entries).await;

        info!(count = entries.len(), "Appended ledger entries");
        Ok(entries)
    }

    async fn reject_closed_days(&self, principal: &Principal, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        let Some(latest) = latest_checkpoint(self.store.as_ref(), principal).await? else {
            return Ok(());
        };
        let checkpoint_day = latest.day();
        match entries
            .iter()
            .filter(|e| &e.principal == principal)
            .map(LedgerEntry::day)
            .find(|day| *day <= checkpoint_day)
        {
            Some(day) => Err(LedgerError::DayClosed { day, checkpoint_day }),
            None => Ok(()),
        }
    }

    /// Entries of `principals` on a day that a checkpoint now covers.
    ///
    /// The closed-day check runs before the write, so a checkpoint created
    /// concurrently can still cover a stored entry. Such an entry is never
    /// folded into any checkpoint.
    pub(crate) async fn entries_on_closed_days<'a>(
        &self,
        principals: &HashSet<Principal>,
        entries: &'a [LedgerEntry],
    ) -> Result<Vec<&'a LedgerEntry>, StoreError> {
        let mut closed = Vec::new();
        for principal in principals {
            let Some(latest) = latest_checkpoint(self.store.as_ref(), principal).await? else {
                continue;
            };
            let checkpoint_day = latest.day();
            closed.extend(
                entries
                    .iter()
                    .filter(|e| &e.principal == principal && e.day() <= checkpoint_day),
            );
        }
        Ok(closed)
    }

    async fn report_late_closed_days(&self, principals: &HashSet<Principal>, entries: &[LedgerEntry]) {
        if principals.is_empty() {
            return;
        }
        match self.entries_on_closed_days(principals, entries).await {
            Ok(closed) => {
                for entry in closed {
                    error!(
                        principal = %entry.principal,
                        key = %entry.key,
                        day = %entry.day(),
                        delta = %entry.delta.amount(),
                        "Entry stored on a day closed during the append; no checkpoint includes it"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to recheck closed days after append"),
        }
    }

    async fn bump_day_counters(&self, entries: &[LedgerEntry]) {
        let mut per_day: BTreeMap<(&Principal, NaiveDate), Decimal> = BTreeMap::new();
        for entry in entries {
            *per_day.entry((&entry.principal, entry.day())).or_default() += entry.delta.amount();
        }

        for ((principal, day), delta) in per_day {
            if let Err(e) = self
                .cache
                .increment(&day_bucket(day), principal, delta, self.counter_ttl)
                .await
            {
                error!(
                    principal = %principal,
                    %day,
                    %delta,
                    error = %e,
                    "Failed to bump day counter; compaction will report drift"
                );
            }
        }
    }
}

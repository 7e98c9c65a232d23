//! Daily checkpoint compaction.
//!
//! Starting after the latest checkpoint, each settled day is folded into a
//! new checkpoint: its entries are summed, compared with the day counter,
//! audited, persisted with create-if-absent, and the counter is retired.
//! A run is bounded by `max_days_per_run` and checks cancellation before
//! every day, so the last persisted checkpoint is always a valid baseline.

use std::sync::Arc;

use chrono::TimeDelta;
use rust_decimal::Decimal;
use serde::Serialize;
use tally_shared::{LedgerSettings, Principal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::audit::AuditorRegistry;
use super::cache::CounterCache;
use super::checkpoint::Checkpoint;
use super::clock::Clock;
use super::day::{self, day_bucket};
use super::drift::{self, DayDrift, DriftPolicy};
use super::entry::DayTotals;
use super::error::LedgerError;
use super::keys::TimeKey;
use super::store::{CreateOutcome, LedgerStore, latest_checkpoint};

/// Why a compaction run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The next day has not settled yet.
    CaughtUp,
    /// Another compactor persisted the next checkpoint first.
    AlreadyCompacted,
    /// The per-run day limit was reached.
    DayLimit,
}

/// Outcome of compacting one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// The principal.
    pub principal: Principal,
    /// True if this run created the bootstrap checkpoint.
    pub bootstrapped: bool,
    /// Checkpoints persisted by this run, oldest first.
    pub created: Vec<Checkpoint>,
    /// Days whose counter disagreed with their entries.
    pub drifts: Vec<DayDrift>,
    /// Why the run stopped.
    pub stop: StopReason,
}

impl CompactionReport {
    fn new(principal: Principal) -> Self {
        Self {
            principal,
            bootstrapped: false,
            created: Vec::new(),
            drifts: Vec::new(),
            stop: StopReason::CaughtUp,
        }
    }
}

/// Result of a sweep over several principals.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Successful runs.
    pub reports: Vec<CompactionReport>,
    /// Principals whose run failed.
    pub failures: Vec<(String, LedgerError)>,
}

/// Folds settled days into checkpoints.
#[derive(Debug)]
pub struct Compactor<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    auditors: AuditorRegistry,
    settings: LedgerSettings,
}

impl<S: LedgerStore, C: CounterCache> Compactor<S, C> {
    /// Creates a compactor.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        cache: Arc<C>,
        clock: Arc<dyn Clock>,
        auditors: AuditorRegistry,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            auditors,
            settings,
        }
    }

    /// Compacts every settled day of one principal.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled`, `DriftDetected` under the halt policy,
    /// `AuditFailed`, or a store/cache error. Checkpoints persisted before
    /// the error stay in place.
    pub async fn compact(&self, principal: &str, cancel: &CancellationToken) -> Result<CompactionReport, LedgerError> {
        let principal = Principal::parse(principal)?;
        let grace = self.settle_grace()?;
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        let mut report = CompactionReport::new(principal.clone());

        let mut previous = if let Some(latest) = latest_checkpoint(self.store.as_ref(), &principal).await? {
            latest
        } else {
            match self.bootstrap(&principal, grace).await? {
                Bootstrap::Created(checkpoint) => {
                    report.bootstrapped = true;
                    report.created.push(checkpoint.clone());
                    checkpoint
                }
                Bootstrap::NotSettled => {
                    debug!(principal = %principal, "Nothing settled to bootstrap from");
                    return Ok(report);
                }
                Bootstrap::Lost => {
                    report.stop = StopReason::AlreadyCompacted;
                    return Ok(report);
                }
            }
        };

        let mut folded = 0u32;
        report.stop = loop {
            if cancel.is_cancelled() {
                info!(
                    principal = %principal,
                    created = report.created.len(),
                    "Compaction cancelled"
                );
                return Err(LedgerError::Cancelled);
            }
            if folded >= self.settings.max_days_per_run {
                break StopReason::DayLimit;
            }
            let Some(day) = previous.day().succ_opt() else {
                break StopReason::CaughtUp;
            };
            let now = self.clock.now();
            if day::end_of(day) + grace >= now {
                break StopReason::CaughtUp;
            }

            let entries = self
                .store
                .entries_in_range(
                    &principal,
                    TimeKey::encode(day::end_of(day))?,
                    TimeKey::encode(day::start_of(day))?,
                    None,
                )
                .await?;
            let totals = DayTotals::from_entries(&entries);

            let bucket = day_bucket(day);
            let observed = self.cache.get(&bucket, &principal).await?.unwrap_or(Decimal::ZERO);
            if let Some(drift) = drift::detect(day, totals.net().amount(), observed) {
                warn!(
                    principal = %principal,
                    %day,
                    expected = %drift.expected,
                    observed = %drift.observed,
                    diff = %drift.diff(),
                    "Day counter drifted from entries"
                );
                if self.settings.drift_policy == DriftPolicy::Halt {
                    return Err(LedgerError::DriftDetected {
                        principal: principal.to_string(),
                        day,
                        expected: drift.expected,
                        observed: drift.observed,
                    });
                }
                report.drifts.push(drift);
            }

            let candidate = previous.next(day, &totals, now)?;
            self.auditors.run(&candidate, &entries).await?;

            if self.store.create_checkpoint(&candidate).await? == CreateOutcome::AlreadyExists {
                info!(principal = %principal, %day, "Checkpoint already persisted by another compactor");
                break StopReason::AlreadyCompacted;
            }
            if let Err(e) = self.cache.delete(&bucket, &principal).await {
                warn!(principal = %principal, %day, error = %e, "Failed to retire day counter");
            }
            debug!(
                principal = %principal,
                %day,
                balance = %candidate.balance,
                entries = candidate.entry_count,
                "Checkpoint created"
            );

            report.created.push(candidate.clone());
            previous = candidate;
            folded += 1;
        };

        info!(
            principal = %principal,
            created = report.created.len(),
            drifts = report.drifts.len(),
            stop = ?report.stop,
            "Compaction finished"
        );
        Ok(report)
    }

    /// Compacts several principals in turn.
    ///
    /// A failure for one principal is logged and does not stop the others.
    /// Cancellation ends the sweep.
    pub async fn compact_all<P: AsRef<str>>(&self, principals: &[P], cancel: &CancellationToken) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        for principal in principals {
            let principal = principal.as_ref();
            if cancel.is_cancelled() {
                break;
            }
            match self.compact(principal, cancel).await {
                Ok(report) => outcome.reports.push(report),
                Err(LedgerError::Cancelled) => {
                    outcome.failures.push((principal.to_string(), LedgerError::Cancelled));
                    break;
                }
                Err(e) => {
                    error!(principal, error = %e, "Compaction failed");
                    outcome.failures.push((principal.to_string(), e));
                }
            }
        }
        outcome
    }

    async fn bootstrap(&self, principal: &Principal, grace: TimeDelta) -> Result<Bootstrap, LedgerError> {
        let now = self.clock.now();
        let first_day = match self.store.earliest_entry(principal).await? {
            Some(entry) => entry.day(),
            None => now.date_naive(),
        };
        let Some(day) = first_day.pred_opt() else {
            return Ok(Bootstrap::NotSettled);
        };
        if day::end_of(day) + grace >= now {
            return Ok(Bootstrap::NotSettled);
        }

        let checkpoint = Checkpoint::bootstrap(principal.clone(), day, now)?;
        match self.store.create_checkpoint(&checkpoint).await? {
            CreateOutcome::Created => {
                info!(principal = %principal, %day, "Bootstrap checkpoint created");
                Ok(Bootstrap::Created(checkpoint))
            }
            CreateOutcome::AlreadyExists => Ok(Bootstrap::Lost),
        }
    }

    fn settle_grace(&self) -> Result<TimeDelta, LedgerError> {
        i64::try_from(self.settings.settle_grace_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| {
                LedgerError::config(format!(
                    "settle_grace_secs {} is out of range",
                    self.settings.settle_grace_secs
                ))
            })
    }
}

enum Bootstrap {
    Created(Checkpoint),
    NotSettled,
    Lost,
}

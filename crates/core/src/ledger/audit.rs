//! Checkpoint auditors.
//!
//! Auditors see every candidate checkpoint together with the entries it
//! folds, in registration order, before the checkpoint is persisted. Any
//! rejection aborts the compaction run.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use super::checkpoint::Checkpoint;
use super::entry::{DayTotals, LedgerEntry};
use super::error::LedgerError;

/// Rejection raised by an auditor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuditError {
    message: String,
}

impl AuditError {
    /// Creates an audit error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The rejection message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Hook invoked for every candidate checkpoint.
#[async_trait]
pub trait Auditor: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Inspects a candidate checkpoint and the entries of its day.
    async fn audit(&self, checkpoint: &Checkpoint, entries: &[LedgerEntry]) -> Result<(), AuditError>;
}

/// Ordered set of auditors.
#[derive(Clone, Default)]
pub struct AuditorRegistry {
    auditors: Vec<Arc<dyn Auditor>>,
}

impl std::fmt::Debug for AuditorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl AuditorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an auditor; it runs after those already registered.
    pub fn register(&mut self, auditor: Arc<dyn Auditor>) {
        self.auditors.push(auditor);
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.auditors.iter().map(|a| a.name())
    }

    /// Number of registered auditors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.auditors.len()
    }

    /// Returns true if no auditor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.auditors.is_empty()
    }

    /// Runs every auditor in order, stopping at the first rejection.
    pub async fn run(&self, checkpoint: &Checkpoint, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        for auditor in &self.auditors {
            if let Err(source) = auditor.audit(checkpoint, entries).await {
                error!(
                    principal = %checkpoint.principal,
                    day = %checkpoint.day(),
                    auditor = auditor.name(),
                    error = %source,
                    "Checkpoint rejected by auditor"
                );
                return Err(LedgerError::AuditFailed {
                    auditor: auditor.name().to_string(),
                    day: checkpoint.day(),
                    source,
                });
            }
        }
        Ok(())
    }
}

/// Checks that a checkpoint continues from its opening balance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuityAuditor;

#[async_trait]
impl Auditor for ContinuityAuditor {
    fn name(&self) -> &str {
        "continuity"
    }

    async fn audit(&self, checkpoint: &Checkpoint, _entries: &[LedgerEntry]) -> Result<(), AuditError> {
        if checkpoint.credits.is_negative() {
            return Err(AuditError::new(format!("credits {} are negative", checkpoint.credits)));
        }
        if checkpoint.debits.is_positive() {
            return Err(AuditError::new(format!("debits {} are positive", checkpoint.debits)));
        }
        let expected = checkpoint.opening_balance + checkpoint.credits + checkpoint.debits;
        if checkpoint.balance != expected {
            return Err(AuditError::new(format!(
                "balance {} does not continue from {} (expected {expected})",
                checkpoint.balance, checkpoint.opening_balance
            )));
        }
        Ok(())
    }
}

/// Recomputes credits, debits and entry count from the entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntrySumAuditor;

#[async_trait]
impl Auditor for EntrySumAuditor {
    fn name(&self) -> &str {
        "entry-sum"
    }

    async fn audit(&self, checkpoint: &Checkpoint, entries: &[LedgerEntry]) -> Result<(), AuditError> {
        let totals = DayTotals::from_entries(entries);
        if totals.credits != checkpoint.credits || totals.debits != checkpoint.debits {
            return Err(AuditError::new(format!(
                "entries sum to credits {} / debits {}, checkpoint has {} / {}",
                totals.credits, totals.debits, checkpoint.credits, checkpoint.debits
            )));
        }
        if totals.count != checkpoint.entry_count {
            return Err(AuditError::new(format!(
                "{} entries folded, checkpoint counts {}",
                totals.count, checkpoint.entry_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use tally_shared::{Money, Principal};

    use crate::ledger::keys::TimeKey;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn checkpoint(opening: Money, credits: Money, debits: Money, count: u64) -> Checkpoint {
        let totals = DayTotals { credits, debits, count };
        let mut previous = Checkpoint::bootstrap(
            Principal::parse("p").unwrap(),
            day().pred_opt().unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap(),
        )
        .unwrap();
        previous.balance = opening;
        previous.next(day(), &totals, previous.created_at).unwrap()
    }

    fn entry(delta: Money, offset: i64) -> LedgerEntry {
        LedgerEntry {
            key: TimeKey::encode(crate::ledger::day::start_of(day()) + chrono::TimeDelta::seconds(offset)).unwrap(),
            principal: Principal::parse("p").unwrap(),
            delta,
            reason: 0,
            remark: String::new(),
            reference: None,
            correlation_id: None,
        }
    }

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        reject: bool,
    }

    #[async_trait]
    impl Auditor for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn audit(&self, _checkpoint: &Checkpoint, _entries: &[LedgerEntry]) -> Result<(), AuditError> {
            self.log.lock().unwrap().push(self.name);
            if self.reject {
                Err(AuditError::new("nope"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_continuity_accepts_consistent_checkpoint() {
        let cp = checkpoint(Money::new(dec!(10)), Money::new(dec!(5)), Money::new(dec!(-2)), 2);
        assert!(ContinuityAuditor.audit(&cp, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_continuity_rejects_broken_balance() {
        let mut cp = checkpoint(Money::new(dec!(10)), Money::new(dec!(5)), Money::new(dec!(-2)), 2);
        cp.balance = Money::new(dec!(99));
        let err = ContinuityAuditor.audit(&cp, &[]).await.unwrap_err();
        assert!(err.message().contains("does not continue"));
    }

    #[tokio::test]
    async fn test_continuity_rejects_signs() {
        let mut cp = checkpoint(Money::zero(), Money::zero(), Money::zero(), 0);
        cp.credits = Money::new(dec!(-1));
        assert!(ContinuityAuditor.audit(&cp, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_entry_sum_matches() {
        let entries = vec![entry(Money::new(dec!(5)), 1), entry(Money::new(dec!(-2)), 2)];
        let cp = checkpoint(Money::zero(), Money::new(dec!(5)), Money::new(dec!(-2)), 2);
        assert!(EntrySumAuditor.audit(&cp, &entries).await.is_ok());

        let short = &entries[..1];
        assert!(EntrySumAuditor.audit(&cp, short).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_runs_in_order_and_stops_on_rejection() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AuditorRegistry::new();
        for (name, reject) in [("first", false), ("second", true), ("third", false)] {
            registry.register(Arc::new(Recording {
                name,
                log: Arc::clone(&log),
                reject,
            }));
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["first", "second", "third"]);

        let cp = checkpoint(Money::zero(), Money::zero(), Money::zero(), 0);
        let err = registry.run(&cp, &[]).await.unwrap_err();

        assert!(matches!(err, LedgerError::AuditFailed { ref auditor, .. } if auditor == "second"));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }
}

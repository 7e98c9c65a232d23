//! Ledger service façade.
//!
//! [`LedgerService`] owns the store, the counter cache, the clock, the
//! settings and the auditors, and exposes every ledger operation through
//! one object.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tally_shared::{LedgerSettings, Money};
use tokio_util::sync::CancellationToken;

use super::append::AppendEngine;
use super::audit::{Auditor, AuditorRegistry};
use super::balance::{Balance, BalanceQuery, EntryPage, EntryPageRequest};
use super::cache::CounterCache;
use super::checkpoint::Checkpoint;
use super::clock::{Clock, SystemClock};
use super::compactor::{CompactionReport, Compactor, SweepOutcome};
use super::entry::{EntryRequest, LedgerEntry};
use super::error::LedgerError;
use super::hold::HoldManager;
use super::keys::KeyGenerator;
use super::store::LedgerStore;

/// Entry point for every ledger operation.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use rust_decimal_macros::dec;
/// # use tally_core::adapters::memory::{MemoryCounterCache, MemoryLedgerStore};
/// # use tally_core::ledger::{EntryRequest, LedgerService};
/// # use tally_shared::LedgerSettings;
/// # use tokio_util::sync::CancellationToken;
/// # async fn demo() -> Result<(), tally_core::ledger::LedgerError> {
/// let ledger = LedgerService::new(
///     Arc::new(MemoryLedgerStore::new()),
///     Arc::new(MemoryCounterCache::new()),
///     LedgerSettings::default(),
/// );
/// let cancel = CancellationToken::new();
/// ledger.append(vec![EntryRequest::new("acct-1", dec!(100))], &cancel).await?;
/// let balance = ledger.balance_now("acct-1", &cancel).await?;
/// assert_eq!(balance.total.amount(), dec!(100));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LedgerService<S: LedgerStore, C: CounterCache> {
    store: Arc<S>,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    keys: Arc<KeyGenerator>,
    auditors: AuditorRegistry,
    settings: LedgerSettings,
}

impl<S: LedgerStore, C: CounterCache> LedgerService<S, C> {
    /// Creates a service on the system clock with no auditors.
    #[must_use]
    pub fn new(store: Arc<S>, cache: Arc<C>, settings: LedgerSettings) -> Self {
        Self {
            store,
            cache,
            clock: Arc::new(SystemClock),
            keys: Arc::new(KeyGenerator::new()),
            auditors: AuditorRegistry::new(),
            settings,
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers an auditor after those already registered.
    #[must_use]
    pub fn with_auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditors.register(auditor);
        self
    }

    /// The active settings.
    #[must_use]
    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Records a batch of entries.
    ///
    /// # Errors
    ///
    /// See [`AppendEngine::append`].
    pub async fn append(
        &self,
        requests: Vec<EntryRequest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.appender().append(requests, cancel).await
    }

    /// Balance at the end of the UTC day containing `as_of`.
    ///
    /// # Errors
    ///
    /// See [`BalanceQuery::balance`].
    pub async fn balance(
        &self,
        principal: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Balance, LedgerError> {
        self.query().balance(principal, as_of, cancel).await
    }

    /// Balance as of now.
    ///
    /// # Errors
    ///
    /// See [`BalanceQuery::balance`].
    pub async fn balance_now(&self, principal: &str, cancel: &CancellationToken) -> Result<Balance, LedgerError> {
        self.query().balance_now(principal, cancel).await
    }

    /// Entry history, newest first.
    ///
    /// # Errors
    ///
    /// See [`BalanceQuery::entries`].
    pub async fn entries(
        &self,
        principal: &str,
        page: &EntryPageRequest,
        cancel: &CancellationToken,
    ) -> Result<EntryPage, LedgerError> {
        self.query().entries(principal, page, cancel).await
    }

    /// Checkpoints with end-instant in `[from, to]`, newest first.
    ///
    /// # Errors
    ///
    /// See [`BalanceQuery::checkpoints`].
    pub async fn checkpoints(
        &self,
        principal: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Checkpoint>, LedgerError> {
        self.query().checkpoints(principal, from, to, cancel).await
    }

    /// Adds to the principal's hold.
    ///
    /// # Errors
    ///
    /// See [`HoldManager::freeze`].
    pub async fn freeze(&self, principal: &str, amount: Decimal, cancel: &CancellationToken) -> Result<Money, LedgerError> {
        self.holds().freeze(principal, amount, cancel).await
    }

    /// Releases part of the principal's hold.
    ///
    /// # Errors
    ///
    /// See [`HoldManager::unfreeze`].
    pub async fn unfreeze(&self, principal: &str, amount: Decimal, cancel: &CancellationToken) -> Result<Money, LedgerError> {
        self.holds().unfreeze(principal, amount, cancel).await
    }

    /// Releases the whole hold.
    ///
    /// # Errors
    ///
    /// See [`HoldManager::unfreeze_all`].
    pub async fn unfreeze_all(&self, principal: &str, cancel: &CancellationToken) -> Result<(), LedgerError> {
        self.holds().unfreeze_all(principal, cancel).await
    }

    /// Current hold.
    ///
    /// # Errors
    ///
    /// See [`HoldManager::frozen`].
    pub async fn frozen(&self, principal: &str) -> Result<Money, LedgerError> {
        self.holds().frozen(principal).await
    }

    /// Compacts one principal.
    ///
    /// # Errors
    ///
    /// See [`Compactor::compact`].
    pub async fn compact(&self, principal: &str, cancel: &CancellationToken) -> Result<CompactionReport, LedgerError> {
        self.compactor().compact(principal, cancel).await
    }

    /// Compacts several principals in turn.
    pub async fn compact_all<P: AsRef<str>>(&self, principals: &[P], cancel: &CancellationToken) -> SweepOutcome {
        self.compactor().compact_all(principals, cancel).await
    }

    fn appender(&self) -> AppendEngine<S, C> {
        AppendEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&self.clock),
            Arc::clone(&self.keys),
            self.settings.counter_ttl_secs.map(Duration::from_secs),
        )
    }

    fn holds(&self) -> HoldManager<C> {
        HoldManager::new(Arc::clone(&self.cache), self.settings.cas_max_retries)
    }

    fn query(&self) -> BalanceQuery<S, C> {
        BalanceQuery::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&self.clock),
            self.holds(),
            self.settings.query_window_days,
        )
    }

    fn compactor(&self) -> Compactor<S, C> {
        Compactor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&self.clock),
            self.auditors.clone(),
            self.settings.clone(),
        )
    }
}

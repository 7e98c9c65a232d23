//! In-memory ledger store and counter cache.
//!
//! Used by tests and for embedding the engine without external services.
//! The store keeps ordered maps behind an async lock; the counter cache is a
//! `DashMap` whose entry API gives per-key atomic increment and swap.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tally_shared::Principal;
use tokio::sync::RwLock;

use crate::ledger::cache::{CacheError, CounterCache};
use crate::ledger::checkpoint::Checkpoint;
use crate::ledger::entry::LedgerEntry;
use crate::ledger::keys::TimeKey;
use crate::ledger::store::{CreateOutcome, LedgerStore, StoreError};

type Keyed<T> = BTreeMap<(Principal, TimeKey), T>;

/// Ledger store backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    entries: RwLock<Keyed<LedgerEntry>>,
    checkpoints: RwLock<Keyed<Checkpoint>>,
}

impl MemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all principals.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn in_range<T: Clone>(map: &Keyed<T>, principal: &Principal, from: TimeKey, to: TimeKey, limit: Option<usize>) -> Vec<T> {
    if from > to {
        return Vec::new();
    }
    map.range((principal.clone(), from)..=(principal.clone(), to))
        .map(|(_, value)| value.clone())
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

impl LedgerStore for MemoryLedgerStore {
    async fn create_entries(&self, entries: &[LedgerEntry]) -> Result<(), StoreError> {
        let mut stored = self.entries.write().await;
        let mut batch = Keyed::new();
        for entry in entries {
            let id = (entry.principal.clone(), entry.key);
            if stored.contains_key(&id) || batch.insert(id, entry.clone()).is_some() {
                return Err(StoreError::Duplicate(entry.key.to_string()));
            }
        }
        stored.append(&mut batch);
        Ok(())
    }

    async fn entries_in_range(
        &self,
        principal: &Principal,
        from: TimeKey,
        to: TimeKey,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(in_range(&*self.entries.read().await, principal, from, to, limit))
    }

    async fn earliest_entry(&self, principal: &Principal) -> Result<Option<LedgerEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range((principal.clone(), TimeKey::NEWEST)..=(principal.clone(), TimeKey::OLDEST))
            .next_back()
            .map(|(_, entry)| entry.clone()))
    }

    async fn create_checkpoint(&self, checkpoint: &Checkpoint) -> Result<CreateOutcome, StoreError> {
        let mut checkpoints = self.checkpoints.write().await;
        let id = (checkpoint.principal.clone(), checkpoint.key);
        if checkpoints.contains_key(&id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        checkpoints.insert(id, checkpoint.clone());
        Ok(CreateOutcome::Created)
    }

    async fn checkpoint_by_key(&self, principal: &Principal, key: TimeKey) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(&(principal.clone(), key))
            .cloned())
    }

    async fn checkpoints_in_range(
        &self,
        principal: &Principal,
        from: TimeKey,
        to: TimeKey,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        Ok(in_range(&*self.checkpoints.read().await, principal, from, to, limit))
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: Decimal,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Decimal, expiry: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: expiry.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Counter cache backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryCounterCache {
    counters: DashMap<(String, Principal), Slot>,
}

impl MemoryCounterCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn id(bucket: &str, principal: &Principal) -> (String, Principal) {
        (bucket.to_string(), principal.clone())
    }
}

impl CounterCache for MemoryCounterCache {
    async fn get(&self, bucket: &str, principal: &Principal) -> Result<Option<Decimal>, CacheError> {
        let now = Instant::now();
        let id = Self::id(bucket, principal);
        self.counters.remove_if(&id, |_, slot| !slot.is_live(now));
        Ok(self.counters.get(&id).map(|slot| slot.value))
    }

    async fn set(
        &self,
        bucket: &str,
        principal: &Principal,
        value: Decimal,
        overwrite: bool,
        expiry: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        match self.counters.entry(Self::id(bucket, principal)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) && !overwrite {
                    return Ok(false);
                }
                occupied.insert(Slot::new(value, expiry));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, expiry));
            }
        }
        Ok(true)
    }

    async fn delete(&self, bucket: &str, principal: &Principal) -> Result<(), CacheError> {
        self.counters.remove(&Self::id(bucket, principal));
        Ok(())
    }

    async fn increment(
        &self,
        bucket: &str,
        principal: &Principal,
        delta: Decimal,
        expiry: Option<Duration>,
    ) -> Result<Decimal, CacheError> {
        let now = Instant::now();
        let value = match self.counters.entry(Self::id(bucket, principal)) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.is_live(now) {
                    slot.value += delta;
                } else {
                    *slot = Slot::new(delta, expiry);
                }
                slot.value
            }
            Entry::Vacant(vacant) => vacant.insert(Slot::new(delta, expiry)).value,
        };
        Ok(value)
    }

    async fn compare_and_swap(
        &self,
        bucket: &str,
        principal: &Principal,
        expected: Option<Decimal>,
        new: Option<Decimal>,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        match self.counters.entry(Self::id(bucket, principal)) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get().is_live(now);
                let current = live.then_some(occupied.get().value);
                if current != expected {
                    return Ok(false);
                }
                match new {
                    Some(value) if live => occupied.get_mut().value = value,
                    // an expired slot counts as absent, so its expiry goes too
                    Some(value) => {
                        occupied.insert(Slot::new(value, None));
                    }
                    None => {
                        occupied.remove();
                    }
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                if let Some(value) = new {
                    vacant.insert(Slot::new(value, None));
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tally_shared::Money;

    fn principal(raw: &str) -> Principal {
        Principal::parse(raw).unwrap()
    }

    fn entry(p: &str, second: u32, delta: Decimal) -> LedgerEntry {
        LedgerEntry {
            key: TimeKey::encode(Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, second).unwrap()).unwrap(),
            principal: principal(p),
            delta: Money::new(delta),
            reason: 0,
            remark: String::new(),
            reference: None,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_entries_are_newest_first() {
        let store = MemoryLedgerStore::new();
        store
            .create_entries(&[entry("a", 1, dec!(1)), entry("a", 3, dec!(3)), entry("b", 2, dec!(2))])
            .await
            .unwrap();

        let found = store
            .entries_in_range(&principal("a"), TimeKey::NEWEST, TimeKey::OLDEST, None)
            .await
            .unwrap();
        let deltas: Vec<_> = found.iter().map(|e| e.delta.amount()).collect();
        assert_eq!(deltas, vec![dec!(3), dec!(1)]);

        let earliest = store.earliest_entry(&principal("a")).await.unwrap().unwrap();
        assert_eq!(earliest.delta.amount(), dec!(1));
        assert!(store.earliest_entry(&principal("c")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_batch_writes_nothing() {
        let store = MemoryLedgerStore::new();
        store.create_entries(&[entry("a", 1, dec!(1))]).await.unwrap();

        let err = store
            .create_entries(&[entry("a", 2, dec!(2)), entry("a", 1, dec!(9))])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty() {
        let store = MemoryLedgerStore::new();
        store.create_entries(&[entry("a", 1, dec!(1))]).await.unwrap();
        let found = store
            .entries_in_range(&principal("a"), TimeKey::OLDEST, TimeKey::NEWEST, None)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_create_if_absent() {
        let store = MemoryLedgerStore::new();
        let day = chrono::NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let checkpoint = Checkpoint::bootstrap(principal("a"), day, Utc::now()).unwrap();

        assert_eq!(store.create_checkpoint(&checkpoint).await.unwrap(), CreateOutcome::Created);
        assert_eq!(
            store.create_checkpoint(&checkpoint).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(
            store.checkpoint_by_key(&principal("a"), checkpoint.key).await.unwrap(),
            Some(checkpoint)
        );
    }

    #[tokio::test]
    async fn test_increment_and_get() {
        let cache = MemoryCounterCache::new();
        let p = principal("a");
        assert_eq!(cache.get("day:20250201", &p).await.unwrap(), None);
        assert_eq!(cache.increment("day:20250201", &p, dec!(5), None).await.unwrap(), dec!(5));
        assert_eq!(cache.increment("day:20250201", &p, dec!(-2), None).await.unwrap(), dec!(3));
        assert_eq!(cache.get("day:20250201", &p).await.unwrap(), Some(dec!(3)));
        assert_eq!(cache.get("day:20250202", &p).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_without_overwrite() {
        let cache = MemoryCounterCache::new();
        let p = principal("a");
        assert!(cache.set("b", &p, dec!(1), false, None).await.unwrap());
        assert!(!cache.set("b", &p, dec!(2), false, None).await.unwrap());
        assert!(cache.set("b", &p, dec!(3), true, None).await.unwrap());
        assert_eq!(cache.get("b", &p).await.unwrap(), Some(dec!(3)));
    }

    #[tokio::test]
    async fn test_expired_counter_is_absent() {
        let cache = MemoryCounterCache::new();
        let p = principal("a");
        cache.increment("b", &p, dec!(4), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(cache.get("b", &p).await.unwrap(), None);
        assert_eq!(cache.increment("b", &p, dec!(1), None).await.unwrap(), dec!(1));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let cache = MemoryCounterCache::new();
        let p = principal("a");

        assert!(!cache.compare_and_swap("b", &p, Some(dec!(1)), Some(dec!(2))).await.unwrap());
        assert!(cache.compare_and_swap("b", &p, None, Some(dec!(2))).await.unwrap());
        assert!(!cache.compare_and_swap("b", &p, None, Some(dec!(3))).await.unwrap());
        assert!(cache.compare_and_swap("b", &p, Some(dec!(2)), Some(dec!(5))).await.unwrap());
        assert_eq!(cache.get("b", &p).await.unwrap(), Some(dec!(5)));
        assert!(cache.compare_and_swap("b", &p, Some(dec!(5)), None).await.unwrap());
        assert_eq!(cache.get("b", &p).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap_replaces_expired_slot() {
        let cache = MemoryCounterCache::new();
        let p = principal("a");

        cache.increment("b", &p, dec!(4), Some(Duration::ZERO)).await.unwrap();
        assert!(!cache.compare_and_swap("b", &p, Some(dec!(4)), Some(dec!(1))).await.unwrap());
        assert!(cache.compare_and_swap("b", &p, None, Some(dec!(7))).await.unwrap());
        assert_eq!(cache.get("b", &p).await.unwrap(), Some(dec!(7)));
        assert_eq!(cache.increment("b", &p, dec!(1), None).await.unwrap(), dec!(8));

        cache.set("c", &p, dec!(2), true, Some(Duration::ZERO)).await.unwrap();
        assert!(cache.compare_and_swap("c", &p, None, None).await.unwrap());
        assert_eq!(cache.get("c", &p).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_exact() {
        let cache = std::sync::Arc::new(MemoryCounterCache::new());
        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let cache = std::sync::Arc::clone(&cache);
                tokio::spawn(async move { cache.increment("b", &principal("a"), dec!(0.01), None).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }
        assert_eq!(cache.get("b", &principal("a")).await.unwrap(), Some(dec!(2.00)));
    }
}

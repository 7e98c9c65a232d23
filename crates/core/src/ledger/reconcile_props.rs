//! Property-based tests for ledger reconciliation.
//!
//! - Reconciliation: checkpoint plus day counters equals a full replay of
//!   the entries, with or without partial compaction
//! - Continuity: consecutive checkpoints chain without gaps

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::LedgerSettings;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::adapters::memory::{MemoryCounterCache, MemoryLedgerStore};
use crate::ledger::day::{end_of, start_of};

type Service = LedgerService<MemoryLedgerStore, MemoryCounterCache>;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 25, 12, 0, 0).unwrap()
}

fn service(max_days: u32) -> Service {
    let settings = LedgerSettings::default()
        .with_settle_grace_secs(0)
        .with_max_days_per_run(max_days);
    LedgerService::new(
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(MemoryCounterCache::new()),
        settings,
    )
    .with_clock(Arc::new(ManualClock::new(now())))
}

/// Entries keyed by (day offset, millisecond of day) so keys are unique.
fn past_entries() -> impl Strategy<Value = BTreeMap<(u32, i64), i64>> {
    prop::collection::btree_map((0u32..10, 0i64..86_400_000), -100_000i64..100_000, 0..40)
}

fn instant_of(day_offset: u32, millis: i64) -> DateTime<Utc> {
    start_of(base_day() + TimeDelta::days(i64::from(day_offset))) + TimeDelta::milliseconds(millis)
}

async fn seed(ledger: &Service, entries: &BTreeMap<(u32, i64), i64>, cancel: &CancellationToken) {
    let requests: Vec<_> = entries
        .iter()
        .map(|(&(day, millis), &cents)| {
            EntryRequest::new("P", Decimal::new(cents, 2))
                .with_key(TimeKey::encode(instant_of(day, millis)).unwrap().to_string())
        })
        .collect();
    ledger.append(requests, cancel).await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_balance_matches_full_replay(
        entries in past_entries(),
        today in prop::collection::vec(-100_000i64..100_000, 0..5),
        max_days in 1u32..6,
        runs in 0usize..4,
    ) {
        let observed = runtime().block_on(async {
            let ledger = service(max_days);
            let cancel = CancellationToken::new();
            seed(&ledger, &entries, &cancel).await;
            for _ in 0..runs {
                ledger.compact("P", &cancel).await.unwrap();
            }
            let requests: Vec<_> = today
                .iter()
                .map(|&cents| EntryRequest::new("P", Decimal::new(cents, 2)))
                .collect();
            ledger.append(requests, &cancel).await.unwrap();

            let mut observed = Vec::new();
            let mut day = NaiveDate::from_ymd_opt(2024, 12, 28).unwrap();
            while day <= NaiveDate::from_ymd_opt(2025, 1, 27).unwrap() {
                let balance = ledger.balance("P", end_of(day), &cancel).await.unwrap();
                observed.push((day, balance.total.amount()));
                day = day.succ_opt().unwrap();
            }
            observed
        });

        for (day, total) in observed {
            let mut expected: Decimal = entries
                .iter()
                .filter(|((offset, millis), _)| instant_of(*offset, *millis).date_naive() <= day)
                .map(|(_, &cents)| Decimal::new(cents, 2))
                .sum();
            if day >= now().date_naive() {
                expected += today.iter().map(|&cents| Decimal::new(cents, 2)).sum::<Decimal>();
            }
            prop_assert_eq!(total, expected, "balance mismatch on {}", day);
        }
    }

    #[test]
    fn prop_checkpoints_chain_without_gaps(entries in past_entries()) {
        let (checkpoints, second_run) = runtime().block_on(async {
            let ledger = service(366);
            let cancel = CancellationToken::new();
            seed(&ledger, &entries, &cancel).await;
            ledger.compact("P", &cancel).await.unwrap();
            let second_run = ledger.compact("P", &cancel).await.unwrap();
            let listed = ledger
                .checkpoints("P", end_of(base_day() - TimeDelta::days(30)), now(), &cancel)
                .await
                .unwrap();
            (listed, second_run)
        });

        prop_assert!(second_run.created.is_empty());
        prop_assert!(!checkpoints.is_empty());
        prop_assert!(checkpoints.last().unwrap().balance.is_zero());
        prop_assert_eq!(checkpoints[0].day(), now().date_naive().pred_opt().unwrap());
        for pair in checkpoints.windows(2) {
            let (newer, older) = (&pair[0], &pair[1]);
            prop_assert_eq!(newer.day().pred_opt().unwrap(), older.day());
            prop_assert_eq!(newer.opening_balance, older.balance);
            prop_assert_eq!(newer.balance, older.balance + newer.credits + newer.debits);
        }
    }
}

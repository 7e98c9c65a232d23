//! Ledger store repository for database operations.
//!
//! Implements the core `LedgerStore` trait over the `ledger_entries` and
//! `ledger_checkpoints` tables. Keys are stored as their 12-digit string
//! form, so lexical order in PostgreSQL matches `TimeKey` order.

use chrono::Utc;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, SqlErr, TransactionTrait, sea_query::OnConflict,
};
use tally_core::ledger::{
    Checkpoint, CreateOutcome, LedgerEntry, LedgerStore, StoreError, TimeKey,
};
use tally_shared::{Money, Principal};
use tracing::{debug, warn};

use crate::entities::{ledger_checkpoints, ledger_entries};

/// Rows per INSERT statement, well below the PostgreSQL bind parameter limit.
const INSERT_CHUNK: usize = 1_000;

/// PostgreSQL-backed ledger store.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    db: DatabaseConnection,
}

impl PgLedgerStore {
    /// Create a new ledger store.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// First key of the batch that is already stored, if any.
    async fn existing_key(&self, entries: &[LedgerEntry]) -> Result<Option<String>, StoreError> {
        let condition = entries.iter().fold(Condition::any(), |condition, entry| {
            condition.add(
                Condition::all()
                    .add(ledger_entries::Column::Principal.eq(entry.principal.as_str()))
                    .add(ledger_entries::Column::EntryKey.eq(entry.key.to_string())),
            )
        });

        let found = ledger_entries::Entity::find()
            .filter(condition)
            .one(&self.db)
            .await
            .map_err(store_err)?;

        Ok(found.map(|model| model.entry_key))
    }
}

impl LedgerStore for PgLedgerStore {
    async fn create_entries(&self, entries: &[LedgerEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin().await.map_err(store_err)?;
        for chunk in entries.chunks(INSERT_CHUNK) {
            let result = ledger_entries::Entity::insert_many(chunk.iter().map(to_active_entry))
                .exec_without_returning(&txn)
                .await;

            if let Err(e) = result {
                if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    // Dropping the transaction rolls back earlier chunks.
                    drop(txn);
                    let key = self
                        .existing_key(entries)
                        .await?
                        .unwrap_or_else(|| "within batch".to_string());
                    debug!(key = %key, "Entry batch rejected as duplicate");
                    return Err(StoreError::Duplicate(key));
                }
                return Err(store_err(e));
            }
        }
        txn.commit().await.map_err(store_err)?;

        Ok(())
    }

    async fn entries_in_range(
        &self,
        principal: &Principal,
        from: TimeKey,
        to: TimeKey,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }

        let mut query = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::Principal.eq(principal.as_str()))
            .filter(ledger_entries::Column::EntryKey.between(from.to_string(), to.to_string()))
            .order_by_asc(ledger_entries::Column::EntryKey);
        if let Some(limit) = limit {
            query = query.limit(to_row_limit(limit));
        }
        let models = query.all(&self.db).await.map_err(store_err)?;

        models.into_iter().map(to_entry).collect()
    }

    async fn earliest_entry(&self, principal: &Principal) -> Result<Option<LedgerEntry>, StoreError> {
        let model = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::Principal.eq(principal.as_str()))
            .order_by_desc(ledger_entries::Column::EntryKey)
            .one(&self.db)
            .await
            .map_err(store_err)?;

        model.map(to_entry).transpose()
    }

    async fn create_checkpoint(&self, checkpoint: &Checkpoint) -> Result<CreateOutcome, StoreError> {
        let entry_count = i64::try_from(checkpoint.entry_count)
            .map_err(|_| StoreError::corrupt(format!("entry count {} overflows", checkpoint.entry_count)))?;

        let active_model = ledger_checkpoints::ActiveModel {
            principal: Set(checkpoint.principal.to_string()),
            checkpoint_key: Set(checkpoint.key.to_string()),
            opening_balance: Set(checkpoint.opening_balance.amount()),
            balance: Set(checkpoint.balance.amount()),
            credits: Set(checkpoint.credits.amount()),
            debits: Set(checkpoint.debits.amount()),
            entry_count: Set(entry_count),
            created_at: Set(checkpoint.created_at.into()),
        };

        let inserted = ledger_checkpoints::Entity::insert(active_model)
            .on_conflict(
                OnConflict::columns([
                    ledger_checkpoints::Column::Principal,
                    ledger_checkpoints::Column::CheckpointKey,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(store_err)?;

        if inserted == 0 {
            return Ok(CreateOutcome::AlreadyExists);
        }
        Ok(CreateOutcome::Created)
    }

    async fn checkpoint_by_key(&self, principal: &Principal, key: TimeKey) -> Result<Option<Checkpoint>, StoreError> {
        let model = ledger_checkpoints::Entity::find_by_id((principal.to_string(), key.to_string()))
            .one(&self.db)
            .await
            .map_err(store_err)?;

        model.map(to_checkpoint).transpose()
    }

    async fn checkpoints_in_range(
        &self,
        principal: &Principal,
        from: TimeKey,
        to: TimeKey,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }

        let mut query = ledger_checkpoints::Entity::find()
            .filter(ledger_checkpoints::Column::Principal.eq(principal.as_str()))
            .filter(ledger_checkpoints::Column::CheckpointKey.between(from.to_string(), to.to_string()))
            .order_by_asc(ledger_checkpoints::Column::CheckpointKey);
        if let Some(limit) = limit {
            query = query.limit(to_row_limit(limit));
        }
        let models = query.all(&self.db).await.map_err(store_err)?;

        models.into_iter().map(to_checkpoint).collect()
    }
}

fn to_row_limit(limit: usize) -> u64 {
    u64::try_from(limit).unwrap_or(u64::MAX)
}

/// Map a database error onto the store boundary.
pub(crate) fn store_err(e: DbErr) -> StoreError {
    match e {
        DbErr::Type(msg) => StoreError::corrupt(msg),
        DbErr::TryIntoErr { from, into, .. } => StoreError::corrupt(format!("cannot convert {from} into {into}")),
        other => {
            warn!(error = %other, "Ledger store query failed");
            StoreError::unavailable(other.to_string())
        }
    }
}

fn to_active_entry(entry: &LedgerEntry) -> ledger_entries::ActiveModel {
    ledger_entries::ActiveModel {
        principal: Set(entry.principal.to_string()),
        entry_key: Set(entry.key.to_string()),
        delta: Set(entry.delta.amount()),
        reason: Set(entry.reason),
        remark: Set(entry.remark.clone()),
        reference: Set(entry.reference.clone()),
        correlation_id: Set(entry.correlation_id.clone()),
        created_at: Set(Utc::now().into()),
    }
}

fn parse_principal(raw: &str) -> Result<Principal, StoreError> {
    Principal::parse(raw).map_err(|e| StoreError::corrupt(format!("principal {raw:?}: {e}")))
}

fn parse_key(raw: &str) -> Result<TimeKey, StoreError> {
    TimeKey::parse(raw).map_err(|e| StoreError::corrupt(format!("key {raw:?}: {e}")))
}

fn to_entry(model: ledger_entries::Model) -> Result<LedgerEntry, StoreError> {
    Ok(LedgerEntry {
        key: parse_key(&model.entry_key)?,
        principal: parse_principal(&model.principal)?,
        delta: Money::new(model.delta),
        reason: model.reason,
        remark: model.remark,
        reference: model.reference,
        correlation_id: model.correlation_id,
    })
}

fn to_checkpoint(model: ledger_checkpoints::Model) -> Result<Checkpoint, StoreError> {
    let entry_count = u64::try_from(model.entry_count)
        .map_err(|_| StoreError::corrupt(format!("negative entry count {}", model.entry_count)))?;

    Ok(Checkpoint {
        principal: parse_principal(&model.principal)?,
        key: parse_key(&model.checkpoint_key)?,
        opening_balance: Money::new(model.opening_balance),
        balance: Money::new(model.balance),
        credits: Money::new(model.credits),
        debits: Money::new(model.debits),
        entry_count,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

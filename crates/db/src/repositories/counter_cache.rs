//! Counter cache repository backed by the `ledger_counters` table.
//!
//! Every operation is a single statement, so PostgreSQL row locking gives
//! the atomicity the core `CounterCache` contract requires. Expired rows
//! are treated as absent and overwritten in place.

use std::time::Duration;

use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, DbErr, Statement, Value};
use tally_core::ledger::{CacheError, CounterCache};
use tally_shared::Principal;
use tracing::warn;

/// Longest expiry accepted; longer values are clamped.
const MAX_EXPIRY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

const GET_SQL: &str = r"
SELECT value FROM ledger_counters
WHERE bucket = $1 AND principal = $2 AND (expires_at IS NULL OR expires_at > now())
";

const UPSERT_SQL: &str = r"
INSERT INTO ledger_counters (bucket, principal, value, expires_at)
VALUES ($1, $2, $3, now() + $4::bigint * interval '1 millisecond')
ON CONFLICT (bucket, principal) DO UPDATE
SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
";

const INSERT_IF_ABSENT_SQL: &str = r"
INSERT INTO ledger_counters (bucket, principal, value, expires_at)
VALUES ($1, $2, $3, now() + $4::bigint * interval '1 millisecond')
ON CONFLICT (bucket, principal) DO UPDATE
SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
WHERE ledger_counters.expires_at IS NOT NULL AND ledger_counters.expires_at <= now()
";

const INCREMENT_SQL: &str = r"
INSERT INTO ledger_counters AS c (bucket, principal, value, expires_at)
VALUES ($1, $2, $3, now() + $4::bigint * interval '1 millisecond')
ON CONFLICT (bucket, principal) DO UPDATE
SET value = CASE
        WHEN c.expires_at IS NOT NULL AND c.expires_at <= now() THEN EXCLUDED.value
        ELSE c.value + EXCLUDED.value
    END,
    expires_at = CASE
        WHEN c.expires_at IS NOT NULL AND c.expires_at <= now() THEN EXCLUDED.expires_at
        ELSE c.expires_at
    END
RETURNING c.value
";

const SWAP_SQL: &str = r"
UPDATE ledger_counters SET value = $3
WHERE bucket = $1 AND principal = $2 AND value = $4 AND (expires_at IS NULL OR expires_at > now())
";

const DELETE_IF_SQL: &str = r"
DELETE FROM ledger_counters
WHERE bucket = $1 AND principal = $2 AND value = $3 AND (expires_at IS NULL OR expires_at > now())
";

const DELETE_SQL: &str = "DELETE FROM ledger_counters WHERE bucket = $1 AND principal = $2";

/// PostgreSQL-backed counter cache.
#[derive(Debug, Clone)]
pub struct PgCounterCache {
    db: DatabaseConnection,
}

impl PgCounterCache {
    /// Create a new counter cache.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn execute(&self, sql: &str, values: Vec<Value>) -> Result<u64, CacheError> {
        let result = self
            .db
            .execute(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
            .await
            .map_err(cache_err)?;
        Ok(result.rows_affected())
    }

    async fn query_value(&self, sql: &str, values: Vec<Value>) -> Result<Option<Decimal>, CacheError> {
        let row = self
            .db
            .query_one(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
            .await
            .map_err(cache_err)?;

        row.map(|row| row.try_get::<Decimal>("", "value"))
            .transpose()
            .map_err(|e| CacheError::corrupt(e.to_string()))
    }
}

impl CounterCache for PgCounterCache {
    async fn get(&self, bucket: &str, principal: &Principal) -> Result<Option<Decimal>, CacheError> {
        self.query_value(GET_SQL, vec![bucket.into(), principal.as_str().into()])
            .await
    }

    async fn set(
        &self,
        bucket: &str,
        principal: &Principal,
        value: Decimal,
        overwrite: bool,
        expiry: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let sql = if overwrite { UPSERT_SQL } else { INSERT_IF_ABSENT_SQL };
        let written = self
            .execute(
                sql,
                vec![
                    bucket.into(),
                    principal.as_str().into(),
                    value.into(),
                    expiry_millis(expiry).into(),
                ],
            )
            .await?;
        Ok(written > 0)
    }

    async fn delete(&self, bucket: &str, principal: &Principal) -> Result<(), CacheError> {
        self.execute(DELETE_SQL, vec![bucket.into(), principal.as_str().into()])
            .await?;
        Ok(())
    }

    async fn increment(
        &self,
        bucket: &str,
        principal: &Principal,
        delta: Decimal,
        expiry: Option<Duration>,
    ) -> Result<Decimal, CacheError> {
        self.query_value(
            INCREMENT_SQL,
            vec![
                bucket.into(),
                principal.as_str().into(),
                delta.into(),
                expiry_millis(expiry).into(),
            ],
        )
        .await?
        .ok_or_else(|| CacheError::corrupt("increment returned no row"))
    }

    async fn compare_and_swap(
        &self,
        bucket: &str,
        principal: &Principal,
        expected: Option<Decimal>,
        new: Option<Decimal>,
    ) -> Result<bool, CacheError> {
        let swapped = match (expected, new) {
            (None, None) => return Ok(self.get(bucket, principal).await?.is_none()),
            (None, Some(new)) => {
                let values = vec![
                    bucket.into(),
                    principal.as_str().into(),
                    new.into(),
                    Value::BigInt(None),
                ];
                self.execute(INSERT_IF_ABSENT_SQL, values).await?
            }
            (Some(expected), Some(new)) => {
                let values = vec![
                    bucket.into(),
                    principal.as_str().into(),
                    new.into(),
                    expected.into(),
                ];
                self.execute(SWAP_SQL, values).await?
            }
            (Some(expected), None) => {
                let values = vec![bucket.into(), principal.as_str().into(), expected.into()];
                self.execute(DELETE_IF_SQL, values).await?
            }
        };
        Ok(swapped > 0)
    }
}

fn expiry_millis(expiry: Option<Duration>) -> Option<i64> {
    expiry.map(|ttl| i64::try_from(ttl.min(MAX_EXPIRY).as_millis()).unwrap_or(i64::MAX))
}

fn cache_err(e: DbErr) -> CacheError {
    match e {
        DbErr::Type(msg) => CacheError::corrupt(msg),
        other => {
            warn!(error = %other, "Counter cache query failed");
            CacheError::unavailable(other.to_string())
        }
    }
}

//! Ledger schema: entries, daily checkpoints and counters.
//!
//! Keys are 12-digit inverted time keys, so ascending key order is newest
//! first and every range scan is a forward index walk.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(LEDGER_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS ledger_counters, ledger_checkpoints, ledger_entries CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const LEDGER_SQL: &str = r"
-- Append-only ledger entries
CREATE TABLE ledger_entries (
    principal VARCHAR(128) NOT NULL,
    entry_key VARCHAR(12) NOT NULL,
    delta NUMERIC(20, 2) NOT NULL,
    reason INTEGER NOT NULL DEFAULT 0,
    remark TEXT NOT NULL DEFAULT '',
    reference TEXT,
    correlation_id TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (principal, entry_key),
    CONSTRAINT chk_entry_key_digits CHECK (entry_key ~ '^[0-9]{12}$')
);

-- One checkpoint per principal per UTC day, keyed by the day's last millisecond
CREATE TABLE ledger_checkpoints (
    principal VARCHAR(128) NOT NULL,
    checkpoint_key VARCHAR(12) NOT NULL,
    opening_balance NUMERIC(20, 2) NOT NULL,
    balance NUMERIC(20, 2) NOT NULL,
    credits NUMERIC(20, 2) NOT NULL,
    debits NUMERIC(20, 2) NOT NULL,
    entry_count BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (principal, checkpoint_key),
    CONSTRAINT chk_checkpoint_key_digits CHECK (checkpoint_key ~ '^[0-9]{12}$'),
    CONSTRAINT chk_checkpoint_count CHECK (entry_count >= 0),
    CONSTRAINT chk_checkpoint_chain CHECK (balance = opening_balance + credits + debits)
);

-- Day counters and frozen amounts
CREATE TABLE ledger_counters (
    bucket VARCHAR(32) NOT NULL,
    principal VARCHAR(128) NOT NULL,
    value NUMERIC(20, 2) NOT NULL,
    expires_at TIMESTAMPTZ,
    PRIMARY KEY (bucket, principal)
);

-- Index for expiry sweeps
CREATE INDEX idx_ledger_counters_expires ON ledger_counters(expires_at) WHERE expires_at IS NOT NULL;
";

//! # PostgreSQL Ledger Store
//!
//! [`LedgerStore`] over a `deadpool-postgres` pool. The schema is created on
//! startup when missing. Voucher redemption runs in one transaction.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{
    Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use super::{AccountRecord, LedgerStore, StoreError};
use crate::configs::DatabaseConfig;

/// Wait limit for checking a connection out of the pool.
const POOL_WAIT_TIMEOUT: Duration = Duration::from_secs(4);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id           BIGSERIAL PRIMARY KEY,
    identity     TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL DEFAULT '',
    balance      DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (balance >= 0)
);
CREATE TABLE IF NOT EXISTS vouchers (
    code   TEXT PRIMARY KEY,
    amount DOUBLE PRECISION NOT NULL CHECK (amount > 0)
);
";

fn pool_error(e: deadpool_postgres::PoolError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn query_error(e: tokio_postgres::Error) -> StoreError {
    match e.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION || *code == SqlState::CHECK_VIOLATION => {
            StoreError::Constraint(e.to_string())
        }
        _ if e.is_closed() => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Query(e.to_string()),
    }
}

fn account_from_row(row: &Row) -> AccountRecord {
    AccountRecord {
        id: row.get("id"),
        identity: row.get("identity"),
        display_name: row.get("display_name"),
        balance: row.get("balance"),
    }
}

/// A wrapper around the PostgreSQL connection pool.
pub struct PgLedgerStore {
    pool: Pool,
}

impl PgLedgerStore {
    /// Creates the pool. No connection is opened until first use; call
    /// [`PgLedgerStore::migrate`] or [`LedgerStore::ping`] to verify.
    pub fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut pg_pool_config = DeadpoolConfig::new();
        pg_pool_config.url = Some(config.url.clone());
        pg_pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg_pool_config.pool = Some(PoolConfig {
            max_size: config.max_connections,
            timeouts: Timeouts {
                wait: Some(POOL_WAIT_TIMEOUT),
                create: Some(POOL_WAIT_TIMEOUT),
                recycle: Some(POOL_WAIT_TIMEOUT),
            },
            ..Default::default()
        });

        let pool = pg_pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Creates the tables when they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.batch_execute(SCHEMA).await.map_err(query_error)?;
        tracing::info!("ledger schema ready");
        Ok(())
    }

    async fn execute(&self, sql: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<u64, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.execute(sql, params).await.map_err(query_error)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.simple_query("SELECT 1").await.map_err(query_error)?;
        Ok(())
    }

    async fn get_account(&self, identity: &str) -> Result<Option<AccountRecord>, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                "SELECT id, identity, display_name, balance FROM accounts WHERE identity = $1",
                &[&identity],
            )
            .await
            .map_err(query_error)?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn upsert_account(&self, identity: &str, display_name: &str) -> Result<AccountRecord, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = client
            .query_one(
                "INSERT INTO accounts (identity, display_name) VALUES ($1, $2)
                 ON CONFLICT (identity) DO UPDATE SET identity = EXCLUDED.identity
                 RETURNING id, identity, display_name, balance",
                &[&identity, &display_name],
            )
            .await
            .map_err(query_error)?;
        Ok(account_from_row(&row))
    }

    async fn credit_balance(&self, identity: &str, delta: f64) -> Result<u64, StoreError> {
        self.execute(
            "UPDATE accounts SET balance = balance + $1 WHERE identity = $2",
            &[&delta, &identity],
        )
        .await
    }

    async fn set_balance(&self, identity: &str, value: f64) -> Result<u64, StoreError> {
        self.execute(
            "UPDATE accounts SET balance = $1 WHERE identity = $2",
            &[&value, &identity],
        )
        .await
    }

    async fn reset_balance(&self, identity: &str) -> Result<u64, StoreError> {
        self.execute("UPDATE accounts SET balance = 0 WHERE identity = $1", &[&identity])
            .await
    }

    async fn rename_account(&self, identity: &str, display_name: &str) -> Result<u64, StoreError> {
        self.execute(
            "UPDATE accounts SET display_name = $1 WHERE identity = $2",
            &[&display_name, &identity],
        )
        .await
    }

    async fn insert_voucher(&self, code: &str, amount: f64) -> Result<(), StoreError> {
        self.execute(
            "INSERT INTO vouchers (code, amount) VALUES ($1, $2)",
            &[&code, &amount],
        )
        .await?;
        Ok(())
    }

    async fn delete_voucher(&self, code: &str) -> Result<u64, StoreError> {
        self.execute("DELETE FROM vouchers WHERE code = $1", &[&code]).await
    }

    async fn voucher_amount(&self, code: &str) -> Result<Option<f64>, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT amount FROM vouchers WHERE code = $1", &[&code])
            .await
            .map_err(query_error)?;
        Ok(row.map(|r| r.get::<_, f64>("amount")))
    }

    async fn redeem_voucher(&self, code: &str, identity: &str) -> Result<Option<f64>, StoreError> {
        let mut object = self.pool.get().await.map_err(pool_error)?;
        let client: &mut tokio_postgres::Client = &mut object;
        let tx = client.transaction().await.map_err(query_error)?;

        let Some(row) = tx
            .query_opt("DELETE FROM vouchers WHERE code = $1 RETURNING amount", &[&code])
            .await
            .map_err(query_error)?
        else {
            // Dropping the transaction rolls it back.
            return Ok(None);
        };
        let amount: f64 = row.get("amount");

        // Accounts are created lazily; a first-time redeemer gets one here.
        tx.execute(
            "INSERT INTO accounts (identity, balance) VALUES ($1, $2)
             ON CONFLICT (identity) DO UPDATE SET balance = accounts.balance + EXCLUDED.balance",
            &[&identity, &amount],
        )
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(Some(amount))
    }
}

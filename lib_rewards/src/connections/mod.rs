//! # Connections Module
//!
//! The persistent ledger behind a row-level contract. "No rows affected" and
//! "not found" are ordinary results here; the callers decide whether they are
//! errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Module for the PostgreSQL ledger backend.
#[cfg(feature = "postgres")]
pub mod db_postgres;

#[cfg(feature = "postgres")]
pub use db_postgres::PgLedgerStore;

/// Custom error types for store operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query execution failed: {0}")]
    Query(String),
    /// A uniqueness or check constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),
}

/// One persisted ledger account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Internal numeric id.
    pub id: i64,
    /// Public key.
    pub identity: String,
    pub display_name: String,
    /// Points; never negative.
    pub balance: f64,
}

/// # Ledger Store
///
/// Accounts and vouchers. Mutations return the number of affected rows.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Connectivity probe used at boot.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_account(&self, identity: &str) -> Result<Option<AccountRecord>, StoreError>;

    /// Get-or-create. An existing account keeps its display name.
    async fn upsert_account(&self, identity: &str, display_name: &str) -> Result<AccountRecord, StoreError>;

    /// Adds `delta` to the balance.
    async fn credit_balance(&self, identity: &str, delta: f64) -> Result<u64, StoreError>;

    async fn set_balance(&self, identity: &str, value: f64) -> Result<u64, StoreError>;

    async fn reset_balance(&self, identity: &str) -> Result<u64, StoreError>;

    async fn rename_account(&self, identity: &str, display_name: &str) -> Result<u64, StoreError>;

    async fn insert_voucher(&self, code: &str, amount: f64) -> Result<(), StoreError>;

    async fn delete_voucher(&self, code: &str) -> Result<u64, StoreError>;

    async fn voucher_amount(&self, code: &str) -> Result<Option<f64>, StoreError>;

    /// Removes the voucher and credits its amount to `identity` as one unit of
    /// work. `Ok(None)` when the code does not exist; nothing changes then.
    /// A missing account is created (empty display name) inside the same unit.
    async fn redeem_voucher(&self, code: &str, identity: &str) -> Result<Option<f64>, StoreError>;
}

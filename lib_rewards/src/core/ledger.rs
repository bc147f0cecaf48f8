//! # Ledger
//!
//! Account-level operations on top of the store. Accrual credits tolerate a
//! missing row (logged); administrative debits and resets do not.

use std::sync::Arc;

use thiserror::Error;

use crate::connections::{AccountRecord, LedgerStore, StoreError};
use crate::utils::is_identity;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("{operation} affected no rows for {identity}")]
    NoRowsAffected { operation: &'static str, identity: String },
    #[error("public key must be 64 hex characters, got {0}")]
    InvalidIdentity(usize),
    #[error("invalid points value: {0}")]
    InvalidPoints(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidIdentity(_) | LedgerError::InvalidPoints(_) | LedgerError::AccountNotFound(_)
        )
    }
}

/// Outcome of an administrative debit.
#[derive(Debug, Clone, PartialEq)]
pub struct DebitReceipt {
    pub identity: String,
    pub display_name: String,
    pub previous: f64,
    /// What was actually taken (less than requested when clamped).
    pub debited: f64,
    pub remaining: f64,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Get-or-create the account for `identity`.
    pub async fn ensure_account(&self, identity: &str, display_name: &str) -> Result<AccountRecord, LedgerError> {
        Ok(self.store.upsert_account(identity, display_name).await?)
    }

    pub async fn account(&self, identity: &str) -> Result<Option<AccountRecord>, LedgerError> {
        Ok(self.store.get_account(identity).await?)
    }

    /// Accrual credit. Returns whether a row was updated; a missing row is
    /// logged as an anomaly and is not an error.
    pub async fn credit(&self, identity: &str, points: f64) -> Result<bool, LedgerError> {
        let rows = self.store.credit_balance(identity, points).await?;
        if rows == 0 {
            tracing::warn!(identity, points, "credit matched no account, award lost");
            return Ok(false);
        }
        tracing::debug!(identity, points, "points credited");
        Ok(true)
    }

    /// Administrative balance lookup with input validation.
    pub async fn balance(&self, identity: &str) -> Result<AccountRecord, LedgerError> {
        check_identity(identity)?;
        self.store
            .get_account(identity)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(identity.to_string()))
    }

    /// Sets the balance to zero. Returns the account as it was before.
    pub async fn reset(&self, identity: &str) -> Result<AccountRecord, LedgerError> {
        let before = self.balance(identity).await?;
        let rows = self.store.reset_balance(identity).await?;
        if rows == 0 {
            return Err(LedgerError::NoRowsAffected {
                operation: "reset",
                identity: identity.to_string(),
            });
        }
        tracing::info!(identity, previous = before.balance, "balance reset");
        Ok(before)
    }

    /// Takes `points` from the balance, never going below zero.
    pub async fn decrease(&self, identity: &str, points: f64) -> Result<DebitReceipt, LedgerError> {
        if !points.is_finite() || points < 0.0 {
            return Err(LedgerError::InvalidPoints(points.to_string()));
        }
        let account = self.balance(identity).await?;
        let remaining = (account.balance - points).max(0.0);

        let rows = self.store.set_balance(identity, remaining).await?;
        if rows == 0 {
            return Err(LedgerError::NoRowsAffected {
                operation: "debit",
                identity: identity.to_string(),
            });
        }
        let debited = account.balance - remaining;
        tracing::info!(identity, requested = points, debited, remaining, "balance debited");
        Ok(DebitReceipt {
            identity: account.identity,
            display_name: account.display_name,
            previous: account.balance,
            debited,
            remaining,
        })
    }
}

fn check_identity(identity: &str) -> Result<(), LedgerError> {
    if is_identity(identity) {
        Ok(())
    } else {
        Err(LedgerError::InvalidIdentity(identity.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryLedgerStore;

    const BOB: &str = "B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0";

    async fn ledger_with(balance: f64) -> (Ledger, Arc<MemoryLedgerStore>) {
        let store = Arc::new(MemoryLedgerStore::new());
        store.upsert_account(BOB, "bob").await.unwrap();
        store.set_balance(BOB, balance).await.unwrap();
        (Ledger::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_debit_clamps_at_zero() {
        let (ledger, store) = ledger_with(10.0).await;
        let receipt = ledger.decrease(BOB, 15.0).await.unwrap();
        assert_eq!(receipt.remaining, 0.0);
        assert_eq!(receipt.debited, 10.0);
        assert_eq!(store.get_account(BOB).await.unwrap().unwrap().balance, 0.0);
    }

    #[tokio::test]
    async fn test_debit_partial() {
        let (ledger, _) = ledger_with(10.0).await;
        let receipt = ledger.decrease(BOB, 4.0).await.unwrap();
        assert_eq!(receipt.remaining, 6.0);
        assert_eq!(receipt.previous, 10.0);
    }

    #[tokio::test]
    async fn test_debit_rejects_bad_input() {
        let (ledger, _) = ledger_with(10.0).await;
        assert!(matches!(ledger.decrease(BOB, -1.0).await, Err(LedgerError::InvalidPoints(_))));
        assert!(matches!(ledger.decrease("short", 1.0).await, Err(LedgerError::InvalidIdentity(5))));
        let stranger = "C".repeat(64);
        assert!(matches!(
            ledger.decrease(&stranger, 1.0).await,
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset() {
        let (ledger, store) = ledger_with(42.0).await;
        let before = ledger.reset(BOB).await.unwrap();
        assert_eq!(before.balance, 42.0);
        assert_eq!(store.get_account(BOB).await.unwrap().unwrap().balance, 0.0);
    }

    #[tokio::test]
    async fn test_credit_missing_account_is_not_error() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = Ledger::new(store);
        assert!(!ledger.credit(BOB, 1.0).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_account_keeps_existing_name() {
        let (ledger, _) = ledger_with(1.0).await;
        let account = ledger.ensure_account(BOB, "renamed").await.unwrap();
        assert_eq!(account.display_name, "bob");
        assert_eq!(account.balance, 1.0);
    }
}

//! In-memory ledger store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::connections::{AccountRecord, LedgerStore, StoreError};

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, AccountRecord>,
    vouchers: HashMap<String, f64>,
    next_id: i64,
}

/// [`LedgerStore`] over two hash maps, with the same row-count semantics as
/// the Postgres backend.
#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: Mutex<Tables>,
    credit_attempts: AtomicUsize,
    fail_credits: AtomicBool,
    fail_upserts: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, identity: &str) -> Option<f64> {
        lock(&self.tables).accounts.get(identity).map(|a| a.balance)
    }

    /// Calls to `credit_balance`, failed ones included.
    pub fn credit_attempts(&self) -> usize {
        self.credit_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_credits(&self, fail: bool) {
        self.fail_credits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn voucher_count(&self) -> usize {
        lock(&self.tables).vouchers.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_account(&self, identity: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(lock(&self.tables).accounts.get(identity).cloned())
    }

    async fn upsert_account(&self, identity: &str, display_name: &str) -> Result<AccountRecord, StoreError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected upsert failure".into()));
        }
        let mut tables = lock(&self.tables);
        if let Some(existing) = tables.accounts.get(identity) {
            return Ok(existing.clone());
        }
        tables.next_id += 1;
        let record = AccountRecord {
            id: tables.next_id,
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            balance: 0.0,
        };
        tables.accounts.insert(identity.to_string(), record.clone());
        Ok(record)
    }

    async fn credit_balance(&self, identity: &str, delta: f64) -> Result<u64, StoreError> {
        self.credit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected credit failure".into()));
        }
        match lock(&self.tables).accounts.get_mut(identity) {
            Some(account) => {
                account.balance += delta;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn set_balance(&self, identity: &str, value: f64) -> Result<u64, StoreError> {
        if value < 0.0 {
            return Err(StoreError::Constraint("balance must not be negative".into()));
        }
        match lock(&self.tables).accounts.get_mut(identity) {
            Some(account) => {
                account.balance = value;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn reset_balance(&self, identity: &str) -> Result<u64, StoreError> {
        self.set_balance(identity, 0.0).await
    }

    async fn rename_account(&self, identity: &str, display_name: &str) -> Result<u64, StoreError> {
        match lock(&self.tables).accounts.get_mut(identity) {
            Some(account) => {
                account.display_name = display_name.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_voucher(&self, code: &str, amount: f64) -> Result<(), StoreError> {
        let mut tables = lock(&self.tables);
        if tables.vouchers.contains_key(code) {
            return Err(StoreError::Constraint(format!("voucher {code} already exists")));
        }
        tables.vouchers.insert(code.to_string(), amount);
        Ok(())
    }

    async fn delete_voucher(&self, code: &str) -> Result<u64, StoreError> {
        Ok(u64::from(lock(&self.tables).vouchers.remove(code).is_some()))
    }

    async fn voucher_amount(&self, code: &str) -> Result<Option<f64>, StoreError> {
        Ok(lock(&self.tables).vouchers.get(code).copied())
    }

    async fn redeem_voucher(&self, code: &str, identity: &str) -> Result<Option<f64>, StoreError> {
        let mut tables = lock(&self.tables);
        let Some(amount) = tables.vouchers.get(code).copied() else {
            return Ok(None);
        };
        if !tables.accounts.contains_key(identity) {
            tables.next_id += 1;
            let id = tables.next_id;
            tables.accounts.insert(
                identity.to_string(),
                AccountRecord {
                    id,
                    identity: identity.to_string(),
                    display_name: String::new(),
                    balance: 0.0,
                },
            );
        }
        if let Some(account) = tables.accounts.get_mut(identity) {
            account.balance += amount;
        }
        tables.vouchers.remove(code);
        Ok(Some(amount))
    }
}

//! # Voucher Ledger
//!
//! Single-use codes worth a fixed number of points. Codes look like
//! `<prefix>XX-XXXX-XXXX-XXXX` (uppercase alphanumerics). Redemption is
//! delegated to the store as one atomic unit so a voucher can never be
//! consumed twice or consumed without a credit.

use std::sync::Arc;

use rand::distr::Alphanumeric;
use rand::Rng;
use thiserror::Error;

use crate::configs::VoucherConfig;
use crate::connections::{LedgerStore, StoreError};

/// Lengths of the random groups after the prefix.
const GROUPS: [usize; 4] = [2, 4, 4, 4];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VoucherError {
    #[error("voucher amount must be positive, got {0}")]
    InvalidAmount(f64),
    #[error("voucher amount {amount} exceeds the maximum of {max}")]
    AboveMaximum { amount: f64, max: f64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VoucherError {
    pub fn is_validation(&self) -> bool {
        matches!(self, VoucherError::InvalidAmount(_) | VoucherError::AboveMaximum { .. })
    }
}

pub struct VoucherLedger {
    store: Arc<dyn LedgerStore>,
    prefix: String,
    max_amount: f64,
}

impl VoucherLedger {
    pub fn new(store: Arc<dyn LedgerStore>, config: &VoucherConfig) -> Self {
        Self {
            store,
            prefix: config.prefix.clone(),
            max_amount: config.max_amount,
        }
    }

    /// Fixed length of every code this ledger issues.
    pub fn code_length(&self) -> usize {
        self.prefix.len() + GROUPS.iter().sum::<usize>() + GROUPS.len() - 1
    }

    /// Whether a free-text message should be treated as a redemption attempt.
    pub fn looks_like_code(&self, text: &str) -> bool {
        let text = text.trim();
        text.len() == self.code_length() || (!self.prefix.is_empty() && text.contains(&self.prefix))
    }

    pub fn generate_code(&self) -> String {
        let mut rng = rand::rng();
        let groups: Vec<String> = GROUPS
            .iter()
            .map(|len| {
                (&mut rng)
                    .sample_iter(Alphanumeric)
                    .take(*len)
                    .map(|b| char::from(b).to_ascii_uppercase())
                    .collect()
            })
            .collect();
        format!("{}{}", self.prefix, groups.join("-"))
    }

    /// Creates and stores a voucher worth `amount` points.
    pub async fn issue(&self, amount: f64) -> Result<String, VoucherError> {
        if !(amount > 0.0) {
            return Err(VoucherError::InvalidAmount(amount));
        }
        if amount > self.max_amount {
            return Err(VoucherError::AboveMaximum {
                amount,
                max: self.max_amount,
            });
        }
        let code = self.generate_code();
        self.store.insert_voucher(&code, amount).await?;
        tracing::info!(code = %code, amount, "voucher issued");
        Ok(code)
    }

    /// Consumes `code` in favour of `identity`. Returns `0.0` when the code
    /// does not exist or was already used.
    pub async fn redeem(&self, code: &str, identity: &str) -> Result<f64, VoucherError> {
        let code = code.trim();
        match self.store.redeem_voucher(code, identity).await? {
            Some(amount) => {
                tracing::info!(code, identity, amount, "voucher redeemed");
                Ok(amount)
            }
            None => {
                tracing::info!(code, identity, "voucher not found or already used");
                Ok(0.0)
            }
        }
    }

    /// Deletes an unused voucher. Returns whether it existed.
    pub async fn revoke(&self, code: &str) -> Result<bool, VoucherError> {
        let deleted = self.store.delete_voucher(code.trim()).await?;
        Ok(deleted > 0)
    }

    /// Value of an unused voucher, if any.
    pub async fn amount(&self, code: &str) -> Result<Option<f64>, VoucherError> {
        Ok(self.store.voucher_amount(code.trim()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryLedgerStore;

    const ALICE: &str = "A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1";

    fn ledger(prefix: &str) -> (VoucherLedger, Arc<MemoryLedgerStore>) {
        let store = Arc::new(MemoryLedgerStore::new());
        let config = VoucherConfig {
            prefix: prefix.to_string(),
            ..Default::default()
        };
        (VoucherLedger::new(store.clone(), &config), store)
    }

    fn assert_shape(code: &str, prefix: &str) {
        let body = code.strip_prefix(prefix).unwrap();
        let groups: Vec<&str> = body.split('-').collect();
        assert_eq!(groups.iter().map(|g| g.len()).collect::<Vec<_>>(), vec![2, 4, 4, 4]);
        assert!(body
            .chars()
            .all(|c| c == '-' || c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_issue_then_redeem_once() {
        let (ledger, store) = ledger("GAME-");
        store.upsert_account(ALICE, "alice").await.unwrap();

        let code = ledger.issue(50.0).await.unwrap();
        assert_shape(&code, "GAME-");
        assert_eq!(code.len(), ledger.code_length());

        assert_eq!(ledger.redeem(&code, ALICE).await.unwrap(), 50.0);
        assert_eq!(ledger.redeem(&code, ALICE).await.unwrap(), 0.0);
        assert_eq!(store.get_account(ALICE).await.unwrap().unwrap().balance, 50.0);
    }

    #[tokio::test]
    async fn test_issue_validation() {
        let (ledger, _) = ledger("");
        assert!(matches!(ledger.issue(0.0).await, Err(VoucherError::InvalidAmount(_))));
        assert!(matches!(ledger.issue(-5.0).await, Err(VoucherError::InvalidAmount(_))));
        assert!(matches!(ledger.issue(f64::NAN).await, Err(VoucherError::InvalidAmount(_))));
        assert!(matches!(
            ledger.issue(1001.0).await,
            Err(VoucherError::AboveMaximum { .. })
        ));
        assert!(ledger.issue(1000.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_redeem_unknown_code_is_zero() {
        let (ledger, _) = ledger("");
        assert_eq!(ledger.redeem("NO-SUCH-CODE-HERE", ALICE).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_any_identity_can_redeem() {
        let (ledger, store) = ledger("");
        let code = ledger.issue(50.0).await.unwrap();
        assert_eq!(ledger.redeem(&code, ALICE).await.unwrap(), 50.0);
        assert_eq!(store.balance_of(ALICE), Some(50.0));
        assert_eq!(ledger.redeem(&code, ALICE).await.unwrap(), 0.0);
        assert_eq!(ledger.amount(&code).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revoke() {
        let (ledger, _) = ledger("");
        let code = ledger.issue(10.0).await.unwrap();
        assert!(ledger.revoke(&code).await.unwrap());
        assert!(!ledger.revoke(&code).await.unwrap());
    }

    #[test]
    fn test_looks_like_code() {
        let (plain, _) = ledger("");
        assert_eq!(plain.code_length(), 17);
        assert!(plain.looks_like_code("AB-CDEF-GHIJ-KLMN"));
        assert!(!plain.looks_like_code("balance"));

        let (prefixed, _) = ledger("GAME-");
        assert!(prefixed.looks_like_code("here: GAME-AB"));
        assert!(!prefixed.looks_like_code("hello there"));
    }
}

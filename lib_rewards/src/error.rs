//! # Error Types
//!
//! Every module owns a narrow `thiserror` enum. `BridgeError` is the umbrella
//! used at the seams where failures from several collaborators meet (the
//! accrual tick, the event router, the failure handler).

use thiserror::Error;

pub use crate::configs::ConfigError;
pub use crate::connections::StoreError;
pub use crate::core::ledger::LedgerError;
pub use crate::core::vouchers::VoucherError;
pub use crate::network::NetworkError;
pub use crate::remediation::RemediationError;

/// Umbrella error for engine operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Voucher(#[from] VoucherError),
    #[error(transparent)]
    Remediation(#[from] RemediationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The supervisor was cancelled while waiting to reconnect.
    #[error("operation cancelled by shutdown")]
    Shutdown,
}

impl BridgeError {
    /// True when the failure means the upstream link itself is gone and a
    /// restart/reconnect cycle is required.
    pub fn is_connection_broken(&self) -> bool {
        matches!(self, BridgeError::Network(e) if e.is_connection_broken())
    }

    /// True for errors caused by bad caller input rather than a broken collaborator.
    pub fn is_validation(&self) -> bool {
        match self {
            BridgeError::Ledger(e) => e.is_validation(),
            BridgeError::Voucher(e) => e.is_validation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_broken_classification() {
        let broken: BridgeError = NetworkError::ConnectionBroken("reset by peer".into()).into();
        assert!(broken.is_connection_broken());

        let app: BridgeError = NetworkError::Application("unknown method".into()).into();
        assert!(!app.is_connection_broken());

        let store: BridgeError = StoreError::Unavailable("pool timeout".into()).into();
        assert!(!store.is_connection_broken());
    }

    #[test]
    fn test_validation_classification() {
        let err: BridgeError = VoucherError::InvalidAmount(0.0).into();
        assert!(err.is_validation());
        let err: BridgeError = LedgerError::InvalidIdentity(3).into();
        assert!(err.is_validation());
        assert!(!BridgeError::Shutdown.is_validation());
    }
}

//! # Remediation Module
//!
//! Side effects the engine uses when it cannot fix a problem by itself:
//! restarting a service unit, and telling an administrator.

use async_trait::async_trait;
use thiserror::Error;

/// `systemctl restart` escalation.
pub mod restart;
/// Webhook notifications with failover.
pub mod notify;

pub use notify::WebhookNotifier;
pub use restart::SystemctlRestart;

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("failed to launch restart of {unit}: {source}")]
    Spawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },

    #[error("restart of {unit} exited with status {status}: {stderr}")]
    ExitStatus { unit: String, status: i32, stderr: String },
}

/// Which service a restart targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceUnit {
    /// The messaging daemon we connect to.
    Network,
    /// This service.
    Bot,
}

/// # Restart Escalation
///
/// Restarting an already healthy unit must be harmless.
#[async_trait]
pub trait RestartEscalation: Send + Sync {
    async fn restart(&self, unit: ServiceUnit) -> Result<(), RemediationError>;
}

/// # Admin Notifier
///
/// Best-effort delivery; failures are logged by the implementation.
#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn notify(&self, subject: &str, message: &str);
}

//! # Messaging Client Contract
//!
//! The operations the engine consumes from the messaging network, expressed
//! independently of any wire format.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::events::NetworkEvent;

/// Failures reported by the messaging network.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NetworkError {
    /// Transport-level failure: the daemon is unreachable or dropped the link.
    #[error("connection broken: {0}")]
    ConnectionBroken(String),
    /// The handshake did not complete within the configured wall-clock limit.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    /// The daemon answered but rejected the request.
    #[error("upstream rejected request: {0}")]
    Application(String),
    /// The daemon answered with something we could not decode.
    #[error("malformed upstream payload: {0}")]
    Decode(String),
}

impl NetworkError {
    /// Whether this error requires a restart/reconnect cycle.
    pub fn is_connection_broken(&self) -> bool {
        matches!(self, NetworkError::ConnectionBroken(_) | NetworkError::HandshakeTimeout(_))
    }
}

/// Presence reported by a contact's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Away,
    DoNotDisturb,
    Invisible,
    Offline,
    /// A status code this build does not know.
    Other(i64),
}

impl PresenceStatus {
    /// Maps the daemon's numeric status code.
    pub fn from_code(code: i64) -> Self {
        match code {
            4096 => PresenceStatus::Online,
            4097 => PresenceStatus::Away,
            4099 => PresenceStatus::DoNotDisturb,
            32768 => PresenceStatus::Invisible,
            65536 => PresenceStatus::Offline,
            other => PresenceStatus::Other(other),
        }
    }

    /// Online, away and do-not-disturb all count as present.
    pub fn is_present(self) -> bool {
        matches!(
            self,
            PresenceStatus::Online | PresenceStatus::Away | PresenceStatus::DoNotDisturb
        )
    }
}

/// One entry of the contact list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Public key of the contact.
    pub identity: String,
    /// Nickname as advertised by the contact.
    pub display_name: String,
    /// Raw presence status code.
    pub status_code: i64,
}

impl ContactRecord {
    /// Decoded presence status.
    pub fn status(&self) -> PresenceStatus {
        PresenceStatus::from_code(self.status_code)
    }

    /// Shortcut for `status().is_present()`.
    pub fn is_present(&self) -> bool {
        self.status().is_present()
    }
}

/// One entry of the monitored channel's roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelContact {
    /// Public key of the member, when the channel exposes it.
    pub identity: String,
    /// Nickname inside the channel.
    pub display_name: String,
}

/// # Messaging Client
///
/// Upstream operations used by the supervisor, the accrual tick, the dispatch
/// gate and the event router.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Full contact list, optionally narrowed by a daemon-side filter.
    async fn get_contacts(&self, filter: &str) -> Result<Vec<ContactRecord>, NetworkError>;

    /// A single contact; `Ok(None)` when the identity is not a contact.
    async fn get_contact(&self, identity: &str) -> Result<Option<ContactRecord>, NetworkError>;

    /// Roster of a channel.
    async fn get_channel_contacts(&self, channel_id: &str) -> Result<Vec<ChannelContact>, NetworkError>;

    /// Sends one direct message.
    async fn send_direct_message(&self, identity: &str, text: &str) -> Result<(), NetworkError>;

    /// Accepts a pending authorization (contact) request.
    async fn accept_authorization(&self, identity: &str) -> Result<(), NetworkError>;

    /// Joins a channel so its roster becomes visible.
    async fn join_channel(&self, channel_id: &str) -> Result<(), NetworkError>;

    /// Cheap liveness probe.
    async fn check_live_connection(&self) -> bool;

    /// Starts delivering notifications into `events`. Returns once the
    /// subscription is established; delivery continues in the background.
    async fn subscribe(&self, events: mpsc::UnboundedSender<NetworkEvent>) -> Result<(), NetworkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_statuses() {
        assert!(PresenceStatus::from_code(4096).is_present());
        assert!(PresenceStatus::from_code(4097).is_present());
        assert!(PresenceStatus::from_code(4099).is_present());
        assert!(!PresenceStatus::from_code(32768).is_present());
        assert!(!PresenceStatus::from_code(65536).is_present());
        assert_eq!(PresenceStatus::from_code(7), PresenceStatus::Other(7));
        assert!(!PresenceStatus::Other(7).is_present());
    }

    #[test]
    fn test_handshake_timeout_counts_as_broken() {
        assert!(NetworkError::HandshakeTimeout(Duration::from_secs(30)).is_connection_broken());
        assert!(!NetworkError::Decode("x".into()).is_connection_broken());
    }
}

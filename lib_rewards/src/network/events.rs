//! # Upstream Events
//!
//! Notifications arrive as `{"type": "...", "data": {...}}` frames. They are
//! decoded once, at the edge, into a closed enum so handlers get exhaustive
//! matching instead of string lookups.

use serde::Deserialize;
use serde_json::Value;

use super::client::NetworkError;

/// A direct message delivered to the bot.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Sender public key.
    pub identity: String,
    /// Sender nickname.
    pub display_name: String,
    /// Message body.
    pub text: String,
    /// False for echoes of our own outgoing messages.
    pub incoming: bool,
}

/// Typed notification from the messaging network.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A contact's presence changed.
    PresenceChanged { identity: String, status_code: i64 },
    /// Someone asked to be added as a contact.
    AuthorizationRequested { identity: String, display_name: String },
    /// A direct message arrived.
    MessageReceived(IncomingMessage),
    /// Any other notification kind; ignored by the router.
    Unrecognized { kind: String },
}

#[derive(Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct StatusData {
    pk: String,
    #[serde(rename = "statusCode")]
    status_code: f64,
}

#[derive(Deserialize)]
struct AuthData {
    pk: String,
    #[serde(default)]
    nick: String,
}

#[derive(Deserialize)]
struct MessageData {
    pk: String,
    #[serde(default)]
    nick: String,
    #[serde(default)]
    text: String,
    #[serde(rename = "isIncoming")]
    is_incoming: bool,
}

impl NetworkEvent {
    /// Decodes one text frame.
    pub fn from_frame(raw: &str) -> Result<Self, NetworkError> {
        let frame: Frame = serde_json::from_str(raw).map_err(|e| NetworkError::Decode(e.to_string()))?;
        let decode = |e: serde_json::Error| NetworkError::Decode(format!("{}: {}", frame.kind, e));

        let event = match frame.kind.as_str() {
            "contactStatusNotification" => {
                let d: StatusData = serde_json::from_value(frame.data.clone()).map_err(decode)?;
                NetworkEvent::PresenceChanged {
                    identity: d.pk,
                    status_code: d.status_code as i64,
                }
            }
            "newAuthorization" => {
                let d: AuthData = serde_json::from_value(frame.data.clone()).map_err(decode)?;
                NetworkEvent::AuthorizationRequested {
                    identity: d.pk,
                    display_name: d.nick,
                }
            }
            "newInstantMessage" => {
                let d: MessageData = serde_json::from_value(frame.data.clone()).map_err(decode)?;
                NetworkEvent::MessageReceived(IncomingMessage {
                    identity: d.pk,
                    display_name: d.nick,
                    text: d.text,
                    incoming: d.is_incoming,
                })
            }
            _ => NetworkEvent::Unrecognized { kind: frame.kind },
        };
        Ok(event)
    }
}

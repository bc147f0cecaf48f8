//! # Messaging Daemon Client
//!
//! JSON-RPC over HTTP. Each call posts `{"method", "params", "token"}` to
//! `<scheme>://<host>:<port>/api/1.0` and reads `{"result"}` or `{"error"}`.
//! Read-only methods go through a retrying middleware client; methods with
//! side effects (sending, accepting, joining) are posted exactly once.

use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::client::{ChannelContact, ContactRecord, MessagingClient, NetworkError};
use super::events::NetworkEvent;
use super::ws_events;
use crate::configs::NetworkConfig;

#[derive(Deserialize)]
struct RpcReply<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct WireContact {
    pk: String,
    #[serde(default)]
    nick: String,
    #[serde(default)]
    status: i64,
}

#[derive(Deserialize)]
struct WireChannelContact {
    #[serde(default)]
    pk: String,
    #[serde(default)]
    nick: String,
}

impl From<WireContact> for ContactRecord {
    fn from(w: WireContact) -> Self {
        ContactRecord {
            identity: w.pk,
            display_name: w.nick,
            status_code: w.status,
        }
    }
}

impl From<WireChannelContact> for ChannelContact {
    fn from(w: WireChannelContact) -> Self {
        ChannelContact {
            identity: w.pk,
            display_name: w.nick,
        }
    }
}

/// Transport failures mean the daemon is gone; everything else is the
/// daemon (or its payload) misbehaving.
fn classify(e: reqwest::Error) -> NetworkError {
    if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
        NetworkError::ConnectionBroken(e.to_string())
    } else if e.is_decode() {
        NetworkError::Decode(e.to_string())
    } else {
        NetworkError::Application(e.to_string())
    }
}

fn classify_middleware(e: reqwest_middleware::Error) -> NetworkError {
    match e {
        reqwest_middleware::Error::Reqwest(e) => classify(e),
        reqwest_middleware::Error::Middleware(e) => NetworkError::ConnectionBroken(e.to_string()),
    }
}

/// # Utopia Client
///
/// Concrete [`MessagingClient`] for the messaging daemon.
pub struct UtopiaClient {
    /// Retrying client for idempotent reads.
    reads: ClientWithMiddleware,
    /// Plain client for calls with side effects.
    writes: reqwest::Client,
    endpoint: Url,
    ws_url: Url,
    token: String,
    ws_port: u16,
    ws_notifications: String,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl UtopiaClient {
    /// Builds the client from configuration. Fails only on malformed host/port.
    pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let endpoint = Url::parse(&format!(
            "{}://{}:{}/api/1.0",
            config.scheme, config.host, config.port
        ))
        .map_err(|e| NetworkError::Application(format!("invalid api endpoint: {e}")))?;

        let ws_scheme = if config.scheme == "https" { "wss" } else { "ws" };
        let ws_url = Url::parse(&format!(
            "{}://{}:{}/UtopiaWSS?token={}",
            ws_scheme, config.host, config.ws_port, config.token
        ))
        .map_err(|e| NetworkError::Application(format!("invalid websocket endpoint: {e}")))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let reads = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            reads,
            writes: reqwest::Client::new(),
            endpoint,
            ws_url,
            token: config.token.clone(),
            ws_port: config.ws_port,
            ws_notifications: config.ws_notifications.clone(),
            reader: Mutex::new(None),
        })
    }

    /// Clears the reader slot when the notification task has exited and
    /// reports whether it did. A stopped reader means events are no longer
    /// delivered even though RPC calls still succeed.
    fn take_finished_reader(&self) -> bool {
        let mut slot = match self.reader.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().is_some_and(JoinHandle::is_finished) {
            slot.take();
            return true;
        }
        false
    }

    fn body(&self, method: &str, params: Value) -> Value {
        json!({
            "method": method,
            "params": params,
            "token": self.token,
        })
    }

    async fn read<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, NetworkError> {
        let response = self
            .reads
            .post(self.endpoint.clone())
            .json(&self.body(method, params))
            .send()
            .await
            .map_err(classify_middleware)?;
        Self::unpack(method, response).await
    }

    async fn write<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, NetworkError> {
        let response = self
            .writes
            .post(self.endpoint.clone())
            .json(&self.body(method, params))
            .send()
            .await
            .map_err(classify)?;
        Self::unpack(method, response).await
    }

    async fn unpack<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T, NetworkError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Application(format!("{method}: HTTP {status}: {body}")));
        }
        let reply: RpcReply<T> = response.json().await.map_err(classify)?;
        if let Some(err) = reply.error.filter(|e| !e.is_null()) {
            return Err(NetworkError::Application(format!("{method}: {err}")));
        }
        reply
            .result
            .ok_or_else(|| NetworkError::Decode(format!("{method}: reply carries no result")))
    }
}

#[async_trait]
impl MessagingClient for UtopiaClient {
    async fn get_contacts(&self, filter: &str) -> Result<Vec<ContactRecord>, NetworkError> {
        let contacts: Vec<WireContact> = self.read("getContacts", json!({ "filter": filter })).await?;
        Ok(contacts.into_iter().map(ContactRecord::from).collect())
    }

    async fn get_contact(&self, identity: &str) -> Result<Option<ContactRecord>, NetworkError> {
        let contacts = self.get_contacts(identity).await?;
        Ok(contacts.into_iter().find(|c| c.identity.eq_ignore_ascii_case(identity)))
    }

    async fn get_channel_contacts(&self, channel_id: &str) -> Result<Vec<ChannelContact>, NetworkError> {
        let roster: Vec<WireChannelContact> = self
            .read("getChannelContacts", json!({ "channelid": channel_id }))
            .await?;
        Ok(roster.into_iter().map(ChannelContact::from).collect())
    }

    async fn send_direct_message(&self, identity: &str, text: &str) -> Result<(), NetworkError> {
        let _: Value = self
            .write("sendInstantMessage", json!({ "to": identity, "text": text }))
            .await?;
        Ok(())
    }

    async fn accept_authorization(&self, identity: &str) -> Result<(), NetworkError> {
        let _: Value = self
            .write("acceptAuthorizationRequest", json!({ "pk": identity, "message": "" }))
            .await?;
        Ok(())
    }

    async fn join_channel(&self, channel_id: &str) -> Result<(), NetworkError> {
        let _: Value = self
            .write("joinChannel", json!({ "ChannelId": channel_id, "password": "" }))
            .await?;
        Ok(())
    }

    async fn check_live_connection(&self) -> bool {
        if self.take_finished_reader() {
            tracing::warn!("notification stream ended, link needs a new handshake");
            return false;
        }
        match self.read::<Value>("getSystemInfo", json!({})).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "liveness probe failed");
                false
            }
        }
    }

    async fn subscribe(&self, events: mpsc::UnboundedSender<NetworkEvent>) -> Result<(), NetworkError> {
        let _: Value = self
            .write(
                "setWebSocketState",
                json!({
                    "enabled": "true",
                    "port": self.ws_port.to_string(),
                    "enablessl": "false",
                    "notifications": self.ws_notifications,
                }),
            )
            .await?;

        let handle = ws_events::spawn_reader(self.ws_url.as_str(), events).await?;

        // A fresh subscription replaces the previous reader.
        let previous = match self.reader.lock() {
            Ok(mut slot) => slot.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(old) = previous {
            old.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NetworkConfig {
        NetworkConfig {
            token: "TOKEN".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoints_from_config() {
        let client = UtopiaClient::new(&config()).unwrap();
        assert_eq!(client.endpoint.as_str(), "http://127.0.0.1:22825/api/1.0");
        assert_eq!(client.ws_url.as_str(), "ws://127.0.0.1:25000/UtopiaWSS?token=TOKEN");
    }

    #[test]
    fn test_request_body_carries_token() {
        let client = UtopiaClient::new(&config()).unwrap();
        let body = client.body("getContacts", json!({ "filter": "" }));
        assert_eq!(body["method"], "getContacts");
        assert_eq!(body["token"], "TOKEN");
    }

    #[test]
    fn test_wire_contact_mapping() {
        let raw = r#"[{"pk":"AA","nick":"bob","status":4096,"isFavorite":false}]"#;
        let wire: Vec<WireContact> = serde_json::from_str(raw).unwrap();
        let contacts: Vec<ContactRecord> = wire.into_iter().map(ContactRecord::from).collect();
        assert_eq!(contacts[0].identity, "AA");
        assert!(contacts[0].is_present());
    }

    #[tokio::test]
    async fn test_finished_reader_reports_dead_link_once() {
        let client = UtopiaClient::new(&config()).unwrap();
        assert!(!client.take_finished_reader());

        let reader = tokio::spawn(async {});
        while !reader.is_finished() {
            tokio::task::yield_now().await;
        }
        *client.reader.lock().unwrap() = Some(reader);
        assert!(client.take_finished_reader());
        assert!(client.reader.lock().unwrap().is_none());
        assert!(!client.take_finished_reader());
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_connection_broken() {
        let cfg = NetworkConfig {
            port: 1,
            token: "T".to_string(),
            ..Default::default()
        };
        let client = UtopiaClient::new(&cfg).unwrap();
        let err = client.send_direct_message("AA", "hi").await.unwrap_err();
        assert!(err.is_connection_broken(), "got {err:?}");
        assert!(!client.check_live_connection().await);
    }
}

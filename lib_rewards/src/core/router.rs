//! # Event Router
//!
//! Consumes upstream notifications and turns them into presence updates,
//! account creation and replies. Regular users only ever see generic error
//! text; moderators get the admin console.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::configs::MessagesConfig;
use crate::core::admin::AdminConsole;
use crate::core::cooldown::CooldownGate;
use crate::core::dispatcher::DispatchGate;
use crate::core::ledger::Ledger;
use crate::core::presence::PresenceTracker;
use crate::core::supervisor::ConnectionSupervisor;
use crate::core::vouchers::VoucherLedger;
use crate::error::BridgeError;
use crate::network::{IncomingMessage, MessagingClient, NetworkEvent, PresenceStatus};
use crate::utils::{format_points, sanitize_display_name};

/// Shorter user messages are rejected before command matching.
const MIN_USER_MESSAGE_LEN: usize = 3;

const REPLY_GENERIC_ERROR: &str = "Sorry, we couldn't process your request.";
const REPLY_TOO_SHORT: &str = "Message is too short.";
const REPLY_VOUCHER_UNAVAILABLE: &str = "This voucher was already used or does not exist.";
const REPLY_VOUCHER_FAILED: &str =
    "Something went wrong while activating the voucher. Please contact a manager with the date and time.";

/// Collaborators of the router.
pub struct RouterParts {
    pub client: Arc<dyn MessagingClient>,
    pub presence: Arc<PresenceTracker>,
    pub ledger: Arc<Ledger>,
    pub vouchers: Arc<VoucherLedger>,
    pub cooldown: Arc<CooldownGate>,
    pub gate: Arc<DispatchGate>,
    pub console: Arc<AdminConsole>,
    pub supervisor: Arc<ConnectionSupervisor>,
}

pub struct EventRouter {
    parts: RouterParts,
    moderators: HashSet<String>,
    messages: MessagesConfig,
    min_withdraw: f64,
}

impl EventRouter {
    pub fn new(parts: RouterParts, moderators: HashSet<String>, messages: MessagesConfig, min_withdraw: f64) -> Self {
        Self {
            parts,
            moderators,
            messages,
            min_withdraw,
        }
    }

    /// Drains `events` until the channel closes or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<NetworkEvent>, cancel: CancellationToken) {
        tracing::info!("event router started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle(event).await {
                        tracing::error!(error = %e, "event handling failed");
                        self.parts.supervisor.on_failure(&e).await;
                    }
                }
            }
        }
        tracing::info!("event router stopped");
    }

    pub async fn handle(&self, event: NetworkEvent) -> Result<(), BridgeError> {
        match event {
            NetworkEvent::PresenceChanged { identity, status_code } => {
                if PresenceStatus::from_code(status_code).is_present() {
                    self.parts.presence.mark_online(&identity);
                } else {
                    self.parts.presence.mark_offline(&identity);
                }
                Ok(())
            }
            NetworkEvent::AuthorizationRequested { identity, display_name } => {
                self.on_authorization(&identity, &display_name).await
            }
            NetworkEvent::MessageReceived(message) => self.on_message(message).await,
            NetworkEvent::Unrecognized { kind } => {
                tracing::debug!(kind, "ignoring unrecognized event");
                Ok(())
            }
        }
    }

    async fn on_authorization(&self, identity: &str, display_name: &str) -> Result<(), BridgeError> {
        tracing::info!(identity, display_name, "authorization requested");
        self.parts
            .ledger
            .ensure_account(identity, &sanitize_display_name(display_name))
            .await?;
        self.parts.client.accept_authorization(identity).await?;
        self.parts.gate.send_all(identity, &self.messages.welcome).await?;
        Ok(())
    }

    async fn on_message(&self, message: IncomingMessage) -> Result<(), BridgeError> {
        if !message.incoming {
            return Ok(());
        }
        let identity = message.identity.as_str();

        let display_name = sanitize_display_name(&message.display_name);

        if self.parts.vouchers.looks_like_code(&message.text) {
            // The account must exist before the attempt counts against the cooldown.
            if let Err(e) = self.parts.ledger.ensure_account(identity, &display_name).await {
                tracing::error!(identity, error = %e, "account lookup failed before redemption");
                return self.reply(identity, REPLY_VOUCHER_FAILED).await;
            }
            let reply = self.redeem(identity, &message.text).await;
            return self.reply(identity, &reply).await;
        }

        if self.moderators.contains(identity) {
            let replies = self.parts.console.handle(&message.text).await;
            self.parts.gate.send_all(identity, &replies).await?;
            return Ok(());
        }

        let account = match self
            .parts
            .ledger
            .ensure_account(identity, &display_name)
            .await
        {
            Ok(account) => account,
            Err(e) => {
                tracing::error!(identity, error = %e, "account lookup failed");
                return self.reply(identity, REPLY_GENERIC_ERROR).await;
            }
        };

        if message.text.len() < MIN_USER_MESSAGE_LEN {
            return self.reply(identity, REPLY_TOO_SHORT).await;
        }

        let reply = match message.text.trim().to_lowercase().as_str() {
            "balance" | "/balance" => {
                let mut reply = format!(
                    "Current balance: {} points.\nMinimum withdrawal: {}.",
                    format_points(account.balance),
                    format_points(self.min_withdraw)
                );
                if account.balance >= self.min_withdraw && !self.messages.manager_contact.is_empty() {
                    reply.push_str(&format!("\n\nTo withdraw, contact {}", self.messages.manager_contact));
                }
                reply
            }
            "manager" | "/manager" => format!("To withdraw points, write to {}", self.messages.manager_contact),
            _ => self.messages.fallback_reply.clone(),
        };
        self.reply(identity, &reply).await
    }

    async fn redeem(&self, identity: &str, text: &str) -> String {
        if !self.parts.cooldown.can_activate(identity) {
            return REPLY_VOUCHER_UNAVAILABLE.to_string();
        }
        match self.parts.vouchers.redeem(text, identity).await {
            Ok(amount) if amount > 0.0 => format!("OK! Voucher activated, +{} points", format_points(amount)),
            Ok(_) => REPLY_VOUCHER_UNAVAILABLE.to_string(),
            Err(e) => {
                tracing::error!(identity, error = %e, "voucher redemption failed");
                REPLY_VOUCHER_FAILED.to_string()
            }
        }
    }

    async fn reply(&self, identity: &str, text: &str) -> Result<(), BridgeError> {
        self.parts.gate.send(identity, text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{VoucherConfig, WithdrawConfig};
    use crate::connections::LedgerStore;
    use crate::core::dispatcher::DispatchMode;
    use crate::core::supervisor::RetryPolicy;
    use crate::testing::{ManualClock, MemoryLedgerStore, MockNetwork, RecordingEscalation, RecordingNotifier};
    use std::time::Duration;

    const ALICE: &str = "A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1";
    const MOD: &str = "D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0";

    struct Harness {
        network: Arc<MockNetwork>,
        store: Arc<MemoryLedgerStore>,
        presence: Arc<PresenceTracker>,
        vouchers: Arc<VoucherLedger>,
        router: EventRouter,
    }

    fn harness() -> Harness {
        let network = Arc::new(MockNetwork::new());
        let store = Arc::new(MemoryLedgerStore::new());
        let presence = Arc::new(PresenceTracker::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        let vouchers = Arc::new(VoucherLedger::new(store.clone(), &VoucherConfig::default()));
        let notifier = Arc::new(RecordingNotifier::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            network.clone(),
            Arc::new(RecordingEscalation::default()),
            notifier.clone(),
            tx,
            RetryPolicy::default(),
            false,
            CancellationToken::new(),
        ));
        let console = Arc::new(AdminConsole::new(
            network.clone(),
            ledger.clone(),
            vouchers.clone(),
            presence.clone(),
            notifier,
            "CHAN".into(),
            WithdrawConfig::default(),
        ));
        let parts = RouterParts {
            client: network.clone(),
            presence: presence.clone(),
            ledger,
            vouchers: vouchers.clone(),
            cooldown: Arc::new(CooldownGate::new(Duration::from_secs(600), Arc::new(ManualClock::default()))),
            gate: Arc::new(DispatchGate::new(
                network.clone(),
                DispatchMode::Exclusive,
                1000,
                Duration::from_secs(1),
            )),
            console,
            supervisor,
        };
        let messages = MessagesConfig {
            welcome: vec!["hi".into(), "stay online".into()],
            manager_contact: "manager-key".into(),
            fallback_reply: "send balance".into(),
        };
        let router = EventRouter::new(parts, [MOD.to_string()].into_iter().collect(), messages, 100.0);
        Harness {
            network,
            store,
            presence,
            vouchers,
            router,
        }
    }

    fn message(identity: &str, text: &str) -> NetworkEvent {
        NetworkEvent::MessageReceived(IncomingMessage {
            identity: identity.to_string(),
            display_name: "alice".to_string(),
            text: text.to_string(),
            incoming: true,
        })
    }

    fn replies(network: &MockNetwork) -> Vec<String> {
        network.sent().into_iter().map(|(_, text)| text).collect()
    }

    #[tokio::test]
    async fn test_presence_events() {
        let h = harness();
        let changed = |code| NetworkEvent::PresenceChanged {
            identity: ALICE.to_string(),
            status_code: code,
        };
        h.router.handle(changed(4099)).await.unwrap();
        assert!(h.presence.is_online(ALICE));
        h.router.handle(changed(32768)).await.unwrap();
        assert!(!h.presence.is_online(ALICE));
    }

    #[tokio::test]
    async fn test_authorization_creates_account_and_welcomes() {
        let h = harness();
        h.router
            .handle(NetworkEvent::AuthorizationRequested {
                identity: ALICE.to_string(),
                display_name: "\"alice\"".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(h.store.get_account(ALICE).await.unwrap().unwrap().display_name, "alice");
        assert_eq!(h.network.accepted(), vec![ALICE.to_string()]);
        assert_eq!(replies(&h.network), vec!["hi", "stay online"]);
    }

    #[tokio::test]
    async fn test_voucher_redeemed_once_then_cooldown() {
        let h = harness();
        h.store.upsert_account(ALICE, "alice").await.unwrap();
        let code = h.vouchers.issue(25.0).await.unwrap();
        h.router.handle(message(ALICE, &code)).await.unwrap();
        let second = h.vouchers.issue(25.0).await.unwrap();
        h.router.handle(message(ALICE, &second)).await.unwrap();

        assert_eq!(
            replies(&h.network),
            vec!["OK! Voucher activated, +25 points", REPLY_VOUCHER_UNAVAILABLE]
        );
        assert_eq!(h.store.balance_of(ALICE), Some(25.0));
        assert_eq!(h.vouchers.amount(&second).await.unwrap(), Some(25.0));
    }

    #[tokio::test]
    async fn test_first_contact_redeems_voucher() {
        let h = harness();
        let code = h.vouchers.issue(50.0).await.unwrap();
        h.router.handle(message(ALICE, &code)).await.unwrap();

        assert_eq!(replies(&h.network), vec!["OK! Voucher activated, +50 points"]);
        let account = h.store.get_account(ALICE).await.unwrap().unwrap();
        assert_eq!(account.balance, 50.0);
        assert_eq!(account.display_name, "alice");
        assert_eq!(h.vouchers.amount(&code).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_outage_does_not_burn_cooldown() {
        let h = harness();
        let code = h.vouchers.issue(10.0).await.unwrap();
        h.store.fail_upserts(true);
        h.router.handle(message(ALICE, &code)).await.unwrap();
        h.store.fail_upserts(false);
        h.router.handle(message(ALICE, &code)).await.unwrap();

        assert_eq!(
            replies(&h.network),
            vec![REPLY_VOUCHER_FAILED.to_string(), "OK! Voucher activated, +10 points".to_string()]
        );
        assert_eq!(h.store.balance_of(ALICE), Some(10.0));
    }

    #[tokio::test]
    async fn test_user_commands() {
        let h = harness();
        h.router.handle(message(ALICE, "hi")).await.unwrap();
        h.router.handle(message(ALICE, " Balance ")).await.unwrap();
        h.router.handle(message(ALICE, "manager")).await.unwrap();
        h.router.handle(message(ALICE, "what is this")).await.unwrap();
        assert_eq!(
            replies(&h.network),
            vec![
                REPLY_TOO_SHORT.to_string(),
                "Current balance: 0 points.\nMinimum withdrawal: 100.".to_string(),
                "To withdraw points, write to manager-key".to_string(),
                "send balance".to_string(),
            ]
        );
        assert!(h.store.get_account(ALICE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_user_never_sees_internal_errors() {
        let h = harness();
        h.store.fail_upserts(true);
        h.router.handle(message(ALICE, "balance")).await.unwrap();
        assert_eq!(replies(&h.network), vec![REPLY_GENERIC_ERROR]);
    }

    #[tokio::test]
    async fn test_moderator_gets_console() {
        let h = harness();
        h.router.handle(message(MOD, "voucher 0")).await.unwrap();
        let sent = replies(&h.network);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("must be positive"));
    }

    #[tokio::test]
    async fn test_outgoing_echo_is_ignored() {
        let h = harness();
        let event = NetworkEvent::MessageReceived(IncomingMessage {
            identity: ALICE.to_string(),
            display_name: "alice".to_string(),
            text: "balance".to_string(),
            incoming: false,
        });
        h.router.handle(event).await.unwrap();
        assert!(h.network.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broken_send_is_returned_for_escalation() {
        let h = harness();
        h.network.fail_sends(Some(crate::network::NetworkError::ConnectionBroken("gone".into())));
        let err = h.router.handle(message(ALICE, "balance")).await.unwrap_err();
        assert!(err.is_connection_broken());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tx.send(NetworkEvent::PresenceChanged {
            identity: ALICE.to_string(),
            status_code: 4096,
        })
        .unwrap();
        tx.send(NetworkEvent::Unrecognized { kind: "x".into() }).unwrap();
        drop(tx);
        h.router.run(rx, cancel).await;
        assert!(h.presence.is_online(ALICE));
    }
}

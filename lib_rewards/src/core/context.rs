//! Wiring of the engine components from a [`ServiceConfig`] and the
//! collaborator implementations.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::configs::ServiceConfig;
use crate::connections::LedgerStore;
use crate::core::accrual::{AccrualScheduler, AccrualSettings};
use crate::core::admin::AdminConsole;
use crate::core::cooldown::CooldownGate;
use crate::core::dispatcher::DispatchGate;
use crate::core::ledger::Ledger;
use crate::core::presence::PresenceTracker;
use crate::core::router::{EventRouter, RouterParts};
use crate::core::supervisor::{ConnectionSupervisor, RetryPolicy};
use crate::core::vouchers::VoucherLedger;
use crate::error::BridgeError;
use crate::network::{MessagingClient, NetworkEvent};
use crate::remediation::{AdminNotifier, RestartEscalation};
use crate::utils::Clock;

/// Implementations of the outside world.
pub struct Collaborators {
    pub client: Arc<dyn MessagingClient>,
    pub store: Arc<dyn LedgerStore>,
    pub escalation: Arc<dyn RestartEscalation>,
    pub notifier: Arc<dyn AdminNotifier>,
    pub clock: Arc<dyn Clock>,
}

/// Every shared component, constructed once per process.
pub struct ServiceContext {
    pub config: ServiceConfig,
    pub client: Arc<dyn MessagingClient>,
    pub notifier: Arc<dyn AdminNotifier>,
    pub presence: Arc<PresenceTracker>,
    pub ledger: Arc<Ledger>,
    pub vouchers: Arc<VoucherLedger>,
    pub gate: Arc<DispatchGate>,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub accrual: Arc<AccrualScheduler>,
    pub console: Arc<AdminConsole>,
    pub router: Arc<EventRouter>,
}

impl ServiceContext {
    /// Builds the context. The receiver gets every upstream event once the
    /// supervisor has subscribed; hand it to [`EventRouter::run`].
    pub fn build(
        config: ServiceConfig,
        parts: Collaborators,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<NetworkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let moderators: HashSet<String> = config.moderators.iter().cloned().collect();

        let presence = Arc::new(PresenceTracker::new());
        let ledger = Arc::new(Ledger::new(parts.store.clone()));
        let vouchers = Arc::new(VoucherLedger::new(parts.store.clone(), &config.vouchers));
        let cooldown = Arc::new(CooldownGate::new(
            Duration::from_secs(config.vouchers.cooldown_minutes.saturating_mul(60)),
            parts.clock.clone(),
        ));
        let gate = Arc::new(DispatchGate::from_config(parts.client.clone(), &config.dispatch));

        let supervisor = Arc::new(ConnectionSupervisor::new(
            parts.client.clone(),
            parts.escalation.clone(),
            parts.notifier.clone(),
            events_tx,
            RetryPolicy::from_config(&config.reconnect, config.network.handshake_timeout_secs),
            config.health.strict_mode,
            cancel,
        ));

        let accrual = Arc::new(AccrualScheduler::new(
            parts.client.clone(),
            presence.clone(),
            ledger.clone(),
            supervisor.clone(),
            parts.escalation.clone(),
            AccrualSettings {
                policy: config.accrual.policy(),
                interval: config.accrual.interval(),
                channel_id: config.channel_id.clone(),
                service_account_name: config.service_account_name.clone(),
                moderators: moderators.clone(),
                strict_channel: config.health.strict_mode,
            },
        ));

        let console = Arc::new(AdminConsole::new(
            parts.client.clone(),
            ledger.clone(),
            vouchers.clone(),
            presence.clone(),
            parts.notifier.clone(),
            config.channel_id.clone(),
            config.withdrawals.clone(),
        ));

        let router = Arc::new(EventRouter::new(
            RouterParts {
                client: parts.client.clone(),
                presence: presence.clone(),
                ledger: ledger.clone(),
                vouchers: vouchers.clone(),
                cooldown,
                gate: gate.clone(),
                console: console.clone(),
                supervisor: supervisor.clone(),
            },
            moderators,
            config.messages.clone(),
            config.withdrawals.min_withdraw,
        ));

        let context = Self {
            config,
            client: parts.client,
            notifier: parts.notifier,
            presence,
            ledger,
            vouchers,
            gate,
            supervisor,
            accrual,
            console,
            router,
        };
        (context, events_rx)
    }

    /// Seeds the presence set from a full contact snapshot. Returns the
    /// number of identities now online.
    pub async fn initial_reconcile(&self) -> Result<usize, BridgeError> {
        let contacts = self.client.get_contacts("").await?;
        self.accrual.reconcile_presence(&contacts);
        let online = self.presence.len();
        tracing::info!(contacts = contacts.len(), online, "presence reconciled");
        Ok(online)
    }

    /// Joins the monitored channel. Failure is reported, not fatal.
    pub async fn join_channel(&self) {
        if self.config.channel_id.is_empty() {
            return;
        }
        if let Err(e) = self.client.join_channel(&self.config.channel_id).await {
            tracing::error!(channel = %self.config.channel_id, error = %e, "failed to join channel");
            self.notifier.notify("channel join failed", &e.to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::IncomingMessage;
    use crate::testing::{ManualClock, MemoryLedgerStore, MockNetwork, RecordingEscalation, RecordingNotifier};

    const ALICE: &str = "A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1";

    #[tokio::test]
    async fn test_huge_cooldown_saturates() {
        let mut config = ServiceConfig::default();
        config.vouchers.cooldown_minutes = u64::MAX;
        config.dispatch.sends_per_window = 100;
        let network = Arc::new(MockNetwork::new());
        let parts = Collaborators {
            client: network.clone(),
            store: Arc::new(MemoryLedgerStore::new()),
            escalation: Arc::new(RecordingEscalation::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            clock: Arc::new(ManualClock::default()),
        };
        let (context, _events) = ServiceContext::build(config, parts, CancellationToken::new());

        let code = context.vouchers.issue(5.0).await.unwrap();
        for _ in 0..2 {
            let message = NetworkEvent::MessageReceived(IncomingMessage {
                identity: ALICE.to_string(),
                display_name: "alice".to_string(),
                text: code.clone(),
                incoming: true,
            });
            context.router.handle(message).await.unwrap();
        }
        let sent: Vec<String> = network.sent().into_iter().map(|(_, text)| text).collect();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], "OK! Voucher activated, +5 points");
        assert_eq!(sent[1], "This voucher was already used or does not exist.");
    }
}

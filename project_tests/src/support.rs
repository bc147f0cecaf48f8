//! Shared fixture: a fully wired `ServiceContext` over in-memory collaborators.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lib_rewards::configs::ServiceConfig;
use lib_rewards::core::{Collaborators, ServiceContext};
use lib_rewards::network::{IncomingMessage, NetworkEvent};
use lib_rewards::testing::{ManualClock, MemoryLedgerStore, MockNetwork, RecordingEscalation, RecordingNotifier};

pub const ALICE: &str = "A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1A1";
pub const BOB: &str = "B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0";
pub const CAROL: &str = "C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0C0";
pub const MODERATOR: &str = "D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0";
pub const SERVICE: &str = "E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0E0";

pub struct Fixture {
    pub network: Arc<MockNetwork>,
    pub store: Arc<MemoryLedgerStore>,
    pub escalation: Arc<RecordingEscalation>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub cancel: CancellationToken,
    pub context: ServiceContext,
    pub events: Option<mpsc::UnboundedReceiver<NetworkEvent>>,
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.channel_id = "CHAN".to_string();
    config.moderators = vec![MODERATOR.to_string()];
    config.accrual.points_per_day = 288.0;
    config.accrual.interval_minutes = 5;
    config.dispatch.sends_per_window = 1000;
    config.dispatch.window_ms = 1000;
    config.vouchers.prefix = "GAME-".to_string();
    config
}

pub fn fixture_with(config: ServiceConfig) -> Fixture {
    let network = Arc::new(MockNetwork::new());
    let store = Arc::new(MemoryLedgerStore::new());
    let escalation = Arc::new(RecordingEscalation::with_log(network.journal()));
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::default());
    let cancel = CancellationToken::new();

    let parts = Collaborators {
        client: network.clone(),
        store: store.clone(),
        escalation: escalation.clone(),
        notifier: notifier.clone(),
        clock: clock.clone(),
    };
    let (context, events) = ServiceContext::build(config, parts, cancel.clone());
    Fixture {
        network,
        store,
        escalation,
        notifier,
        clock,
        cancel,
        context,
        events: Some(events),
    }
}

pub fn fixture() -> Fixture {
    fixture_with(test_config())
}

impl Fixture {
    /// Starts the router on the event stream. Call once.
    pub fn spawn_router(&mut self) -> tokio::task::JoinHandle<()> {
        let events = self.events.take().unwrap();
        let router = self.context.router.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move { router.run(events, cancel).await })
    }

    pub fn say(&self, identity: &str, name: &str, text: &str) {
        assert!(self.network.emit(NetworkEvent::MessageReceived(IncomingMessage {
            identity: identity.to_string(),
            display_name: name.to_string(),
            text: text.to_string(),
            incoming: true,
        })));
    }

    pub fn replies_to(&self, identity: &str) -> Vec<String> {
        self.network
            .sent()
            .into_iter()
            .filter(|(to, _)| to == identity)
            .map(|(_, text)| text)
            .collect()
    }

    /// Waits until `identity` has received `count` replies.
    pub async fn wait_for_replies(&self, identity: &str, count: usize) -> Vec<String> {
        wait_until(|| self.replies_to(identity).len() >= count).await;
        self.replies_to(identity)
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

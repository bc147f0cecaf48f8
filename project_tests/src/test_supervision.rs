//! # Supervision Tests
//!
//! Reconnect cycles, restart escalation and health checks, run on a paused
//! tokio clock so the 12 s / 40 s delays elapse instantly.

mod support;

use std::time::Duration;

use lib_rewards::BridgeError;
use lib_rewards::core::{ConnectionState, HealthReport, TickOutcome};
use lib_rewards::network::NetworkError;
use lib_rewards::remediation::ServiceUnit;
use lib_rewards::testing::{channel_member, contact};

use support::*;

#[tokio::test(start_paused = true)]
async fn test_boot_gives_up_after_one_cycle() {
    let f = fixture();
    f.network.fail_next_handshakes(u32::MAX);
    let err = f.context.supervisor.connect_bounded().await.unwrap_err();
    assert!(err.is_connection_broken());
    assert_eq!(f.escalation.count(), 0);
    assert_eq!(f.network.journal_entries().len(), 5);
    assert_eq!(f.context.supervisor.state().await, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_two_failed_cycles_escalate_twice() {
    let f = fixture();
    f.network.fail_next_handshakes(10);
    f.context.supervisor.connect().await.unwrap();
    assert_eq!(f.escalation.units(), vec![ServiceUnit::Network, ServiceUnit::Network]);
    let journal = f.network.journal_entries();
    assert_eq!(journal[5], "restart:Network");
    assert_eq!(journal[11], "restart:Network");
    assert_eq!(journal.last().map(String::as_str), Some("subscribe"));
}

#[tokio::test(start_paused = true)]
async fn test_health_check_resubscribes_after_link_loss() {
    let f = fixture();
    f.context.supervisor.connect_bounded().await.unwrap();
    f.network.fail_next_handshakes(1);
    let report = f.context.supervisor.health_check().await.unwrap();
    assert_eq!(report, HealthReport::Healthy { contacts: 0 });
    assert_eq!(f.network.subscriptions(), 2);
    assert_eq!(f.escalation.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_read_failure_escalates() {
    let f = fixture();
    f.context.supervisor.connect_bounded().await.unwrap();
    f.network
        .fail_contacts(Some(NetworkError::Application("internal error".into())));
    let report = f.context.supervisor.health_check().await.unwrap();
    assert!(matches!(report, HealthReport::Remediated { .. }));
    assert_eq!(f.escalation.units(), vec![ServiceUnit::Network]);
}

#[tokio::test(start_paused = true)]
async fn test_broken_lookup_during_tick_restarts_and_reconnects() {
    let f = fixture();
    f.network.set_contacts(vec![contact(ALICE, "alice", 4096)]);
    f.network.set_channel(vec![channel_member(ALICE, "alice")]);
    f.context.supervisor.connect_bounded().await.unwrap();
    f.context.initial_reconcile().await.unwrap();
    f.network
        .fail_contact_lookups(Some(NetworkError::ConnectionBroken("socket closed".into())));

    let outcome = f.context.accrual.tick().await;
    assert_eq!(outcome, TickOutcome::Aborted { credited: 0 });
    assert_eq!(f.escalation.units(), vec![ServiceUnit::Network]);
    assert_eq!(f.network.subscriptions(), 2);
    assert_eq!(f.context.supervisor.state().await, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_reconnect_loop() {
    let f = fixture();
    f.network.fail_next_handshakes(u32::MAX);
    let supervisor = f.context.supervisor.clone();
    let task = tokio::spawn(async move { supervisor.connect().await });
    tokio::time::sleep(Duration::from_secs(300)).await;
    f.cancel.cancel();
    assert!(matches!(task.await.unwrap(), Err(BridgeError::Shutdown)));
    assert!(f.escalation.count() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_strict_mode_restarts_service_on_empty_roster() {
    let mut config = test_config();
    config.health.strict_mode = true;
    let f = fixture_with(config);
    f.network.set_contacts(vec![contact(ALICE, "alice", 4096)]);
    f.context.supervisor.connect_bounded().await.unwrap();

    let outcome = f.context.accrual.tick().await;
    assert_eq!(outcome, TickOutcome::NoData);
    assert_eq!(f.escalation.units(), vec![ServiceUnit::Bot]);
}

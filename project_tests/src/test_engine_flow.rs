//! # Engine Flow Tests
//!
//! Drives the wired service context the way the running server does: events
//! arrive through the subscription, the router reacts, the accrual tick
//! credits the ledger.

mod support;

use chrono::Duration as ChronoDuration;

use lib_rewards::connections::LedgerStore;
use lib_rewards::core::TickOutcome;
use lib_rewards::network::NetworkEvent;
use lib_rewards::testing::{channel_member, contact};

use support::*;

fn populate(f: &Fixture) {
    f.network.set_contacts(vec![
        contact(ALICE, "alice", 4096),
        contact(BOB, "bob", 4099),
        contact(CAROL, "carol", 4096),
        contact(MODERATOR, "mod", 4096),
        contact(SERVICE, "Utopia", 4096),
    ]);
    f.network.set_channel(vec![
        channel_member(ALICE, "alice"),
        channel_member(BOB, "bob"),
        channel_member(MODERATOR, "mod"),
        channel_member(SERVICE, "Utopia"),
    ]);
}

#[tokio::test]
async fn test_authorized_users_earn_points_in_channel() {
    let mut f = fixture();
    populate(&f);
    f.context.supervisor.connect_bounded().await.unwrap();
    f.spawn_router();

    for (identity, name) in [(ALICE, "alice"), (BOB, "bob"), (CAROL, "carol")] {
        assert!(f.network.emit(NetworkEvent::AuthorizationRequested {
            identity: identity.to_string(),
            display_name: name.to_string(),
        }));
    }
    wait_until(|| f.network.accepted().len() == 3).await;
    f.wait_for_replies(CAROL, 1).await;

    let online = f.context.initial_reconcile().await.unwrap();
    assert_eq!(online, 4);

    let outcome = f.context.accrual.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Completed {
            credited: 2,
            award: 1.0,
            online_in_channel: 4,
        }
    );
    assert_eq!(f.store.balance_of(ALICE), Some(1.0));
    assert_eq!(f.store.balance_of(BOB), Some(1.0));
    assert_eq!(f.store.balance_of(CAROL), Some(0.0));

    // A second tick keeps accruing from the cached view when upstream reads fail.
    f.network
        .fail_contacts(Some(lib_rewards::network::NetworkError::ConnectionBroken("down".into())));
    f.context.accrual.tick().await;
    assert_eq!(f.store.balance_of(ALICE), Some(2.0));
}

#[tokio::test]
async fn test_presence_event_then_snapshot_wins() {
    let mut f = fixture();
    populate(&f);
    f.context.supervisor.connect_bounded().await.unwrap();
    f.spawn_router();

    assert!(f.network.emit(NetworkEvent::PresenceChanged {
        identity: "F".repeat(64),
        status_code: 4096,
    }));
    wait_until(|| f.context.presence.is_online(&"F".repeat(64))).await;

    f.context.initial_reconcile().await.unwrap();
    assert!(!f.context.presence.is_online(&"F".repeat(64)));
    assert!(f.context.presence.is_online(ALICE));
    assert!(!f.context.presence.is_online(SERVICE));
}

#[tokio::test]
async fn test_moderator_voucher_redeemed_by_user_once() {
    let mut f = fixture();
    populate(&f);
    f.context.supervisor.connect_bounded().await.unwrap();
    f.spawn_router();
    f.store.upsert_account(ALICE, "alice").await.unwrap();

    f.say(MODERATOR, "mod", "voucher 40");
    let replies = f.wait_for_replies(MODERATOR, 1).await;
    let code = replies[0].split_whitespace().nth(1).unwrap().to_string();
    assert!(code.starts_with("GAME-"));

    f.say(ALICE, "alice", &code);
    let replies = f.wait_for_replies(ALICE, 1).await;
    assert_eq!(replies[0], "OK! Voucher activated, +40 points");
    assert_eq!(f.store.balance_of(ALICE), Some(40.0));
    assert_eq!(f.store.voucher_count(), 0);

    // Past the cooldown the same code is simply gone.
    f.clock.advance(ChronoDuration::minutes(11));
    f.say(ALICE, "alice", &code);
    let replies = f.wait_for_replies(ALICE, 2).await;
    assert_eq!(replies[1], "This voucher was already used or does not exist.");
    assert_eq!(f.store.balance_of(ALICE), Some(40.0));
}

#[tokio::test]
async fn test_stranger_redeems_voucher_on_first_message() {
    let mut f = fixture();
    f.context.supervisor.connect_bounded().await.unwrap();
    f.spawn_router();
    let code = f.context.vouchers.issue(50.0).await.unwrap();

    f.say(CAROL, "carol", &code);
    let replies = f.wait_for_replies(CAROL, 1).await;
    assert_eq!(replies[0], "OK! Voucher activated, +50 points");
    let account = f.store.get_account(CAROL).await.unwrap().unwrap();
    assert_eq!(account.balance, 50.0);
    assert_eq!(account.display_name, "carol");
    assert_eq!(f.store.voucher_count(), 0);
}

#[tokio::test]
async fn test_cooldown_blocks_rapid_guessing() {
    let mut f = fixture();
    f.context.supervisor.connect_bounded().await.unwrap();
    f.spawn_router();
    f.store.upsert_account(BOB, "bob").await.unwrap();
    let code = f.context.vouchers.issue(15.0).await.unwrap();

    f.say(BOB, "bob", "GAME-ZZ-ZZZZ-ZZZZ-ZZZZ");
    f.wait_for_replies(BOB, 1).await;
    f.say(BOB, "bob", &code);
    f.wait_for_replies(BOB, 2).await;

    // The valid code arrived inside the window and was not consumed.
    assert_eq!(f.store.balance_of(BOB), Some(0.0));
    assert_eq!(f.context.vouchers.amount(&code).await.unwrap(), Some(15.0));

    f.clock.advance(ChronoDuration::minutes(11));
    f.say(BOB, "bob", &code);
    let replies = f.wait_for_replies(BOB, 3).await;
    assert_eq!(replies[2], "OK! Voucher activated, +15 points");
}

#[tokio::test]
async fn test_moderator_debit_and_http_style_console() {
    let f = fixture();
    f.store.upsert_account(BOB, "bob").await.unwrap();
    f.store.set_balance(BOB, 120.0).await.unwrap();

    let replies = f.context.console.handle(&format!("debit {BOB} 500")).await;
    assert_eq!(replies, vec!["debited 120 from bob, 0 left"]);
    assert_eq!(f.store.balance_of(BOB), Some(0.0));
    assert_eq!(f.notifier.messages().len(), 1);

    let replies = f.context.console.handle("reset 42").await;
    assert_eq!(replies, vec!["public key must be 64 hex characters, got 2"]);
}

#[tokio::test]
async fn test_router_stops_on_cancel() {
    let mut f = fixture();
    let handle = f.spawn_router();
    f.cancel.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

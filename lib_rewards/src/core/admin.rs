//! # Admin Console
//!
//! Text commands shared by moderators (over direct message) and the admin
//! HTTP surface. Every command produces reply lines; business errors become
//! short replies instead of failures.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;

use crate::configs::WithdrawConfig;
use crate::core::accrual::ChannelMembership;
use crate::core::ledger::{DebitReceipt, Ledger};
use crate::core::presence::PresenceTracker;
use crate::core::vouchers::VoucherLedger;
use crate::error::BridgeError;
use crate::network::{ContactRecord, MessagingClient};
use crate::remediation::AdminNotifier;
use crate::utils::{chunk_lines, format_points, sanitize_display_name};

/// Longest single reply sent back over the messaging network.
pub const REPLY_LIMIT: usize = 1024;

const HELP: &[&str] = &[
    "balance <public key>: show points",
    "reset <public key>: set points to zero",
    "debit <public key> <points>: take points (never below zero)",
    "online: list online users",
    "voucher <amount>: issue a voucher",
    "revoke <code>: delete an unused voucher",
    "stats: contact and channel counts",
    "sync-names: refresh stored nicknames from the contact list",
    "help: this list",
];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command \"{0}\", send \"help\" for the list")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("\"{0}\" is not a number")]
    NotANumber(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Balance(String),
    Reset(String),
    Debit { identity: String, points: f64 },
    Online,
    IssueVoucher(f64),
    RevokeVoucher(String),
    Stats,
    SyncNames,
    Help,
}

fn number(raw: &str) -> Result<f64, CommandError> {
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CommandError::NotANumber(raw.to_string()))
}

impl AdminCommand {
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let mut words = text.split_whitespace();
        let Some(head) = words.next() else {
            return Err(CommandError::Unknown(String::new()));
        };
        let args: Vec<&str> = words.collect();
        let command = match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("balance", [identity]) => AdminCommand::Balance(identity.to_string()),
            ("balance", _) => return Err(CommandError::Usage("balance <public key>")),
            ("reset", [identity]) => AdminCommand::Reset(identity.to_string()),
            ("reset", _) => return Err(CommandError::Usage("reset <public key>")),
            ("debit", [identity, points]) => AdminCommand::Debit {
                identity: identity.to_string(),
                points: number(points)?,
            },
            ("debit", _) => return Err(CommandError::Usage("debit <public key> <points>")),
            ("online", _) => AdminCommand::Online,
            ("voucher", [amount]) => AdminCommand::IssueVoucher(number(amount)?),
            ("voucher", _) => return Err(CommandError::Usage("voucher <amount>")),
            ("revoke", [code]) => AdminCommand::RevokeVoucher(code.to_string()),
            ("revoke", _) => return Err(CommandError::Usage("revoke <code>")),
            ("stats", _) => AdminCommand::Stats,
            ("sync-names", _) => AdminCommand::SyncNames,
            ("help", _) => AdminCommand::Help,
            (other, _) => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Counts and CSV export of contacts against the channel roster.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactsReport {
    pub total: usize,
    pub online: usize,
    pub channel_size: usize,
    pub in_channel: usize,
    pub csv: String,
}

impl ContactsReport {
    pub fn build(contacts: &[ContactRecord], membership: &ChannelMembership) -> Self {
        let mut csv = String::from("identity,display_name,status_code,in_channel\n");
        let mut in_channel = 0;
        for c in contacts {
            let member = membership.has_identity(&c.identity);
            if member {
                in_channel += 1;
            }
            csv.push_str(&format!(
                "{},{},{},{}\n",
                c.identity,
                csv_field(&c.display_name),
                c.status_code,
                member
            ));
        }
        Self {
            total: contacts.len(),
            online: contacts.iter().filter(|c| c.is_present()).count(),
            channel_size: membership.len(),
            in_channel,
            csv,
        }
    }

    pub fn summary(&self) -> Vec<String> {
        vec![
            format!("contacts: {}", self.total),
            format!("online: {}", self.online),
            format!("channel members: {}", self.channel_size),
            format!("contacts in channel: {}", self.in_channel),
        ]
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

type WithdrawLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct AdminConsole {
    client: Arc<dyn MessagingClient>,
    ledger: Arc<Ledger>,
    vouchers: Arc<VoucherLedger>,
    presence: Arc<PresenceTracker>,
    notifier: Arc<dyn AdminNotifier>,
    channel_id: String,
    withdrawals: WithdrawConfig,
    withdraw_limiter: WithdrawLimiter,
}

impl AdminConsole {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        ledger: Arc<Ledger>,
        vouchers: Arc<VoucherLedger>,
        presence: Arc<PresenceTracker>,
        notifier: Arc<dyn AdminNotifier>,
        channel_id: String,
        withdrawals: WithdrawConfig,
    ) -> Self {
        let period = Duration::from_secs(withdrawals.notify_period_secs.max(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        Self {
            client,
            ledger,
            vouchers,
            presence,
            notifier,
            channel_id,
            withdrawals,
            withdraw_limiter: RateLimiter::direct(quota),
        }
    }

    /// Parses and runs one command line.
    pub async fn handle(&self, text: &str) -> Vec<String> {
        match AdminCommand::parse(text) {
            Ok(command) => self.execute(command).await,
            Err(e) => vec![e.to_string()],
        }
    }

    pub async fn execute(&self, command: AdminCommand) -> Vec<String> {
        tracing::info!(?command, "admin command");
        match self.run(command).await {
            Ok(lines) => lines,
            Err(e) if e.is_validation() => vec![e.to_string()],
            Err(e) => {
                tracing::error!(error = %e, "admin command failed");
                vec![format!("command failed: {e}")]
            }
        }
    }

    async fn run(&self, command: AdminCommand) -> Result<Vec<String>, BridgeError> {
        let lines = match command {
            AdminCommand::Balance(identity) => {
                let account = self.ledger.balance(&identity).await?;
                vec![format!(
                    "{} has {} points",
                    account.display_name,
                    format_points(account.balance)
                )]
            }
            AdminCommand::Reset(identity) => {
                let before = self.ledger.reset(&identity).await?;
                vec![format!(
                    "balance of {} reset, was {}",
                    before.display_name,
                    format_points(before.balance)
                )]
            }
            AdminCommand::Debit { identity, points } => {
                let receipt = self.ledger.decrease(&identity, points).await?;
                self.announce_withdrawal(&receipt).await;
                vec![format!(
                    "debited {} from {}, {} left",
                    format_points(receipt.debited),
                    receipt.display_name,
                    format_points(receipt.remaining)
                )]
            }
            AdminCommand::Online => self.online().await?,
            AdminCommand::IssueVoucher(amount) => {
                let code = self.vouchers.issue(amount).await?;
                vec![format!("voucher {code} worth {}", format_points(amount))]
            }
            AdminCommand::RevokeVoucher(code) => {
                if self.vouchers.revoke(&code).await? {
                    vec![format!("voucher {code} revoked")]
                } else {
                    vec![format!("voucher {code} not found")]
                }
            }
            AdminCommand::Stats => self.contacts_report().await?.summary(),
            AdminCommand::SyncNames => {
                let renamed = self.sync_names().await?;
                vec![format!("{renamed} nicknames updated")]
            }
            AdminCommand::Help => HELP.iter().map(|s| s.to_string()).collect(),
        };
        Ok(lines)
    }

    async fn online(&self) -> Result<Vec<String>, BridgeError> {
        let online = self.presence.snapshot();
        if online.is_empty() {
            return Ok(vec!["nobody is online".to_string()]);
        }
        let names: HashMap<String, String> = self
            .client
            .get_contacts("")
            .await?
            .into_iter()
            .map(|c| (c.identity, c.display_name))
            .collect();
        let mut lines: Vec<String> = online
            .iter()
            .map(|id| match names.get(id) {
                Some(name) => format!("{name} {id}"),
                None => id.clone(),
            })
            .collect();
        lines.sort();
        let mut replies = vec![format!("{} online", lines.len())];
        replies.extend(chunk_lines(lines, REPLY_LIMIT));
        Ok(replies)
    }

    pub async fn contacts_report(&self) -> Result<ContactsReport, BridgeError> {
        let contacts = self.client.get_contacts("").await?;
        let roster = self.client.get_channel_contacts(&self.channel_id).await?;
        Ok(ContactsReport::build(&contacts, &ChannelMembership::from_roster(&roster)))
    }

    /// Stores the sanitized contact-list nickname of every known account.
    async fn sync_names(&self) -> Result<u64, BridgeError> {
        let contacts = self.client.get_contacts("").await?;
        let mut seen = HashSet::new();
        let mut renamed = 0;
        for c in contacts {
            if !seen.insert(c.identity.clone()) {
                continue;
            }
            renamed += self
                .ledger
                .store()
                .rename_account(&c.identity, &sanitize_display_name(&c.display_name))
                .await?;
        }
        Ok(renamed)
    }

    async fn announce_withdrawal(&self, receipt: &DebitReceipt) {
        if !self.withdrawals.notify_enabled || receipt.debited < self.withdrawals.min_withdraw {
            return;
        }
        if self.withdraw_limiter.check().is_err() {
            tracing::info!(identity = %receipt.identity, "withdrawal announcement dropped by rate limit");
            return;
        }
        let message = format!(
            "{} withdrew {} points ({} left)",
            receipt.display_name,
            format_points(receipt.debited),
            format_points(receipt.remaining)
        );
        self.notifier.notify("withdrawal", &message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::VoucherConfig;
    use crate::connections::LedgerStore;
    use crate::testing::{channel_member, contact, MemoryLedgerStore, MockNetwork, RecordingNotifier};

    const BOB: &str = "B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0B0";

    struct Harness {
        network: Arc<MockNetwork>,
        store: Arc<MemoryLedgerStore>,
        notifier: Arc<RecordingNotifier>,
        presence: Arc<PresenceTracker>,
        console: AdminConsole,
    }

    async fn harness() -> Harness {
        let network = Arc::new(MockNetwork::new());
        let store = Arc::new(MemoryLedgerStore::new());
        store.upsert_account(BOB, "bob").await.unwrap();
        store.set_balance(BOB, 500.0).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let presence = Arc::new(PresenceTracker::new());
        let console = AdminConsole::new(
            network.clone(),
            Arc::new(Ledger::new(store.clone())),
            Arc::new(VoucherLedger::new(store.clone(), &VoucherConfig::default())),
            presence.clone(),
            notifier.clone(),
            "CHAN".into(),
            WithdrawConfig::default(),
        );
        Harness {
            network,
            store,
            notifier,
            presence,
            console,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(AdminCommand::parse("balance X").unwrap(), AdminCommand::Balance("X".into()));
        assert_eq!(
            AdminCommand::parse("DEBIT X 2.5").unwrap(),
            AdminCommand::Debit {
                identity: "X".into(),
                points: 2.5
            }
        );
        assert_eq!(AdminCommand::parse("voucher 50").unwrap(), AdminCommand::IssueVoucher(50.0));
        assert_eq!(AdminCommand::parse("debit X"), Err(CommandError::Usage("debit <public key> <points>")));
        assert_eq!(AdminCommand::parse("voucher ten"), Err(CommandError::NotANumber("ten".into())));
        assert_eq!(AdminCommand::parse("voucher NaN"), Err(CommandError::NotANumber("NaN".into())));
        assert!(matches!(AdminCommand::parse("dance"), Err(CommandError::Unknown(_))));
    }

    #[tokio::test]
    async fn test_balance_and_bad_identity() {
        let h = harness().await;
        assert_eq!(h.console.handle(&format!("balance {BOB}")).await, vec!["bob has 500 points"]);
        let reply = h.console.handle("balance 1234").await;
        assert!(reply[0].contains("64 hex characters"));
    }

    #[tokio::test]
    async fn test_debit_announces_once_per_period() {
        let h = harness().await;
        let reply = h.console.handle(&format!("debit {BOB} 150")).await;
        assert_eq!(reply, vec!["debited 150 from bob, 350 left"]);
        h.console.handle(&format!("debit {BOB} 150")).await;
        assert_eq!(h.notifier.messages().len(), 1);
        assert_eq!(h.store.balance_of(BOB), Some(200.0));
    }

    #[tokio::test]
    async fn test_small_debit_is_not_announced() {
        let h = harness().await;
        h.console.handle(&format!("debit {BOB} 5")).await;
        assert!(h.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_voucher_validation_is_a_reply() {
        let h = harness().await;
        let reply = h.console.handle("voucher 5000").await;
        assert!(reply[0].contains("exceeds the maximum"));
        let reply = h.console.handle("voucher 20").await;
        assert!(reply[0].starts_with("voucher "));
    }

    #[tokio::test]
    async fn test_online_listing_is_chunked() {
        let h = harness().await;
        let mut contacts = Vec::new();
        for i in 0..40 {
            let id = format!("{i:064X}");
            h.presence.mark_online(&id);
            contacts.push(contact(&id, &format!("user{i}"), 4096));
        }
        h.network.set_contacts(contacts);
        let replies = h.console.handle("online").await;
        assert_eq!(replies[0], "40 online");
        assert!(replies.len() > 2);
        assert!(replies.iter().all(|r| r.len() <= REPLY_LIMIT));
    }

    #[tokio::test]
    async fn test_stats_and_csv() {
        let h = harness().await;
        h.network.set_contacts(vec![contact(BOB, "bob, jr", 4096), contact("X", "x", 65536)]);
        h.network.set_channel(vec![channel_member(BOB, "bob, jr")]);
        let report = h.console.contacts_report().await.unwrap();
        assert_eq!((report.total, report.online, report.channel_size, report.in_channel), (2, 1, 1, 1));
        assert_eq!(
            report.csv,
            format!("identity,display_name,status_code,in_channel\n{BOB},\"bob, jr\",4096,true\nX,x,65536,false\n")
        );
    }

    #[tokio::test]
    async fn test_sync_names() {
        let h = harness().await;
        h.network.set_contacts(vec![contact(BOB, "Bob \"the\" Builder", 4096)]);
        assert_eq!(h.console.handle("sync-names").await, vec!["1 nicknames updated"]);
        assert_eq!(
            h.store.get_account(BOB).await.unwrap().unwrap().display_name,
            "Bob the Builder"
        );
    }
}

//! # Accrual Scheduler
//!
//! One tick credits every identity that is both online and visibly present
//! in the monitored channel.
//!
//! ## Tick
//! 1. Contact list, falling back to the last good snapshot.
//! 2. Channel roster, with its own independent fallback.
//! 3. Membership filter rebuilt from scratch.
//! 4. `online_in_channel` count feeds the award policy.
//! 5. Credit loop over the presence snapshot. The first failing credit
//!    aborts the rest of the tick and goes to the failure handler.
//!
//! A tick that starts while another is running returns immediately.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::award::AwardPolicy;
use crate::core::ledger::Ledger;
use crate::core::presence::PresenceTracker;
use crate::core::supervisor::ConnectionSupervisor;
use crate::error::BridgeError;
use crate::network::{ChannelContact, ContactRecord, MessagingClient, NetworkError};
use crate::remediation::{RestartEscalation, ServiceUnit};

/// Channel roster indexed for lookups, rebuilt every tick.
#[derive(Debug, Default, Clone)]
pub struct ChannelMembership {
    by_name: HashSet<String>,
    identities: HashSet<String>,
}

impl ChannelMembership {
    pub fn from_roster(roster: &[ChannelContact]) -> Self {
        let mut membership = Self::default();
        for member in roster {
            membership.by_name.insert(member.display_name.clone());
            if !member.identity.is_empty() {
                membership.identities.insert(member.identity.clone());
            }
        }
        membership
    }

    pub fn has_name(&self, display_name: &str) -> bool {
        self.by_name.contains(display_name)
    }

    pub fn has_identity(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another tick was in progress.
    Skipped,
    /// No contact or roster data, neither fresh nor cached.
    NoData,
    Completed {
        credited: usize,
        award: f64,
        online_in_channel: usize,
    },
    /// A credit failed; identities after it were not processed.
    Aborted { credited: usize },
}

/// Static inputs of the tick.
#[derive(Debug, Clone)]
pub struct AccrualSettings {
    pub policy: AwardPolicy,
    pub interval: Duration,
    pub channel_id: String,
    pub service_account_name: String,
    /// Administrators are never credited.
    pub moderators: HashSet<String>,
    /// An empty channel roster counts as a failed fetch.
    pub strict_channel: bool,
}

/// Clears the in-progress flag when the tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AccrualScheduler {
    client: Arc<dyn MessagingClient>,
    presence: Arc<PresenceTracker>,
    ledger: Arc<Ledger>,
    supervisor: Arc<ConnectionSupervisor>,
    escalation: Arc<dyn RestartEscalation>,
    settings: AccrualSettings,
    in_progress: AtomicBool,
    contacts_cache: Mutex<Option<Vec<ContactRecord>>>,
    channel_cache: Mutex<Option<Vec<ChannelContact>>>,
}

impl AccrualScheduler {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        presence: Arc<PresenceTracker>,
        ledger: Arc<Ledger>,
        supervisor: Arc<ConnectionSupervisor>,
        escalation: Arc<dyn RestartEscalation>,
        settings: AccrualSettings,
    ) -> Self {
        Self {
            client,
            presence,
            ledger,
            supervisor,
            escalation,
            settings,
            in_progress: AtomicBool::new(false),
            contacts_cache: Mutex::new(None),
            channel_cache: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Runs one tick. Failures are handed to the supervisor, never returned.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("accrual tick still running, skipping");
            return TickOutcome::Skipped;
        }
        let _guard = TickGuard(&self.in_progress);

        match self.run().await {
            Ok(outcome) => outcome,
            Err((credited, err)) => {
                tracing::error!(credited, error = %err, "accrual tick aborted");
                self.supervisor.on_failure(&err).await;
                TickOutcome::Aborted { credited }
            }
        }
    }

    async fn run(&self) -> Result<TickOutcome, (usize, BridgeError)> {
        let Some(contacts) = self.contacts().await else {
            tracing::warn!("no contact data, skipping accrual tick");
            return Ok(TickOutcome::NoData);
        };
        let Some(roster) = self.channel_roster().await else {
            tracing::warn!("no channel roster, skipping accrual tick");
            return Ok(TickOutcome::NoData);
        };

        let membership = ChannelMembership::from_roster(&roster);
        let online_in_channel = contacts
            .iter()
            .filter(|c| membership.has_identity(&c.identity))
            .count();
        let award = self.settings.policy.award_per_tick(online_in_channel, self.settings.interval);

        let mut credited = 0usize;
        for identity in self.presence.snapshot() {
            if self.settings.moderators.contains(&identity) {
                continue;
            }
            let record = match self.client.get_contact(&identity).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => return Err((credited, e.into())),
            };
            if record.display_name == self.settings.service_account_name {
                continue;
            }
            if !membership.has_name(&record.display_name) {
                continue;
            }
            if award <= 0.0 {
                continue;
            }
            match self.ledger.credit(&identity, award).await {
                Ok(true) => credited += 1,
                Ok(false) => {}
                Err(e) => return Err((credited, e.into())),
            }
        }

        tracing::info!(credited, award, online_in_channel, "accrual tick completed");
        Ok(TickOutcome::Completed {
            credited,
            award,
            online_in_channel,
        })
    }

    /// Fresh contacts, or the cached snapshot when the fetch fails.
    async fn contacts(&self) -> Option<Vec<ContactRecord>> {
        match self.client.get_contacts("").await {
            Ok(contacts) => {
                self.reconcile_presence(&contacts);
                let mut cache = self.contacts_cache.lock().unwrap_or_else(|p| p.into_inner());
                *cache = Some(contacts.clone());
                Some(contacts)
            }
            Err(e) => {
                tracing::warn!(error = %e, "contact fetch failed, using cached snapshot");
                self.contacts_cache.lock().unwrap_or_else(|p| p.into_inner()).clone()
            }
        }
    }

    async fn channel_roster(&self) -> Option<Vec<ChannelContact>> {
        let fetched = match self.client.get_channel_contacts(&self.settings.channel_id).await {
            Ok(roster) if self.settings.strict_channel && roster.is_empty() => {
                tracing::error!(channel = %self.settings.channel_id, "channel roster is empty, restarting service");
                if let Err(e) = self.escalation.restart(ServiceUnit::Bot).await {
                    tracing::error!(error = %e, "service restart failed");
                }
                Err(NetworkError::Application("empty channel roster".into()))
            }
            other => other,
        };
        match fetched {
            Ok(roster) => {
                let mut cache = self.channel_cache.lock().unwrap_or_else(|p| p.into_inner());
                *cache = Some(roster.clone());
                Some(roster)
            }
            Err(e) => {
                tracing::warn!(error = %e, "channel roster fetch failed, using cached snapshot");
                self.channel_cache.lock().unwrap_or_else(|p| p.into_inner()).clone()
            }
        }
    }

    /// Replaces the presence set with the online contacts of a snapshot.
    pub fn reconcile_presence(&self, contacts: &[ContactRecord]) {
        let service = &self.settings.service_account_name;
        self.presence.reconcile(
            contacts
                .iter()
                .filter(|c| c.is_present() && &c.display_name != service)
                .map(|c| c.identity.clone()),
        );
    }
}

//! Scripted messaging network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::lock;
use crate::network::{ChannelContact, ContactRecord, MessagingClient, NetworkError, NetworkEvent};

/// Shared, ordered record of upstream calls and escalations.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// In-memory [`MessagingClient`] with failure injection.
///
/// The journal records `probe` for every liveness check and `subscribe` for
/// every established subscription; [`super::RecordingEscalation::with_log`]
/// appends restarts to the same journal so tests can assert ordering.
#[derive(Default)]
pub struct MockNetwork {
    contacts: Mutex<Vec<ContactRecord>>,
    channel: Mutex<Vec<ChannelContact>>,
    hidden: Mutex<HashSet<String>>,
    contacts_error: Mutex<Option<NetworkError>>,
    channel_error: Mutex<Option<NetworkError>>,
    lookup_error: Mutex<Option<NetworkError>>,
    send_error: Mutex<Option<NetworkError>>,
    contacts_hold: Mutex<Option<Arc<Notify>>>,
    contacts_calls: AtomicUsize,
    probe_failures: AtomicU32,
    probe_hangs: AtomicU32,
    send_delay: Duration,
    sends_in_flight: AtomicUsize,
    max_sends_in_flight: AtomicUsize,
    send_attempts: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
    accepted: Mutex<Vec<String>>,
    joined: Mutex<Vec<String>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<NetworkEvent>>>,
    subscriptions: AtomicUsize,
    stream_dropped: AtomicBool,
    journal: Journal,
}

fn consume(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send takes this long.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn journal_entries(&self) -> Vec<String> {
        lock(&self.journal).clone()
    }

    pub fn set_contacts(&self, contacts: Vec<ContactRecord>) {
        *lock(&self.contacts) = contacts;
    }

    pub fn set_channel(&self, roster: Vec<ChannelContact>) {
        *lock(&self.channel) = roster;
    }

    /// `get_contact` answers `None` for this identity.
    pub fn hide_contact(&self, identity: &str) {
        lock(&self.hidden).insert(identity.to_string());
    }

    pub fn fail_contacts(&self, err: Option<NetworkError>) {
        *lock(&self.contacts_error) = err;
    }

    pub fn fail_channel(&self, err: Option<NetworkError>) {
        *lock(&self.channel_error) = err;
    }

    pub fn fail_contact_lookups(&self, err: Option<NetworkError>) {
        *lock(&self.lookup_error) = err;
    }

    pub fn fail_sends(&self, err: Option<NetworkError>) {
        *lock(&self.send_error) = err;
    }

    /// The next `n` liveness probes report a dead link.
    pub fn fail_next_handshakes(&self, n: u32) {
        self.probe_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` liveness probes never answer.
    pub fn hang_next_probes(&self, n: u32) {
        self.probe_hangs.store(n, Ordering::SeqCst);
    }

    /// The next `get_contacts` call waits until the returned handle is notified.
    pub fn hold_contacts(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *lock(&self.contacts_hold) = Some(notify.clone());
        notify
    }

    pub fn contacts_calls(&self) -> usize {
        self.contacts_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_sends(&self) -> usize {
        self.max_sends_in_flight.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<String> {
        lock(&self.accepted).clone()
    }

    pub fn joined(&self) -> Vec<String> {
        lock(&self.joined).clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Ends the notification stream. Events are no longer delivered and the
    /// next liveness probe reports the link as dead.
    pub fn drop_stream(&self) {
        lock(&self.subscriber).take();
        self.stream_dropped.store(true, Ordering::SeqCst);
    }

    /// Delivers an event to the current subscriber. False when nobody listens.
    pub fn emit(&self, event: NetworkEvent) -> bool {
        match lock(&self.subscriber).as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl MessagingClient for MockNetwork {
    async fn get_contacts(&self, _filter: &str) -> Result<Vec<ContactRecord>, NetworkError> {
        self.contacts_calls.fetch_add(1, Ordering::SeqCst);
        let hold = lock(&self.contacts_hold).take();
        if let Some(hold) = hold {
            hold.notified().await;
        }
        if let Some(err) = lock(&self.contacts_error).clone() {
            return Err(err);
        }
        Ok(lock(&self.contacts).clone())
    }

    async fn get_contact(&self, identity: &str) -> Result<Option<ContactRecord>, NetworkError> {
        if let Some(err) = lock(&self.lookup_error).clone() {
            return Err(err);
        }
        if lock(&self.hidden).contains(identity) {
            return Ok(None);
        }
        Ok(lock(&self.contacts).iter().find(|c| c.identity == identity).cloned())
    }

    async fn get_channel_contacts(&self, _channel_id: &str) -> Result<Vec<ChannelContact>, NetworkError> {
        if let Some(err) = lock(&self.channel_error).clone() {
            return Err(err);
        }
        Ok(lock(&self.channel).clone())
    }

    async fn send_direct_message(&self, identity: &str, text: &str) -> Result<(), NetworkError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.send_error).clone() {
            return Err(err);
        }
        let in_flight = self.sends_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_sends_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        lock(&self.sent).push((identity.to_string(), text.to_string()));
        self.sends_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn accept_authorization(&self, identity: &str) -> Result<(), NetworkError> {
        lock(&self.accepted).push(identity.to_string());
        Ok(())
    }

    async fn join_channel(&self, channel_id: &str) -> Result<(), NetworkError> {
        lock(&self.joined).push(channel_id.to_string());
        Ok(())
    }

    async fn check_live_connection(&self) -> bool {
        lock(&self.journal).push("probe".to_string());
        if consume(&self.probe_hangs) {
            return std::future::pending::<bool>().await;
        }
        if self.stream_dropped.swap(false, Ordering::SeqCst) {
            return false;
        }
        !consume(&self.probe_failures)
    }

    async fn subscribe(&self, events: mpsc::UnboundedSender<NetworkEvent>) -> Result<(), NetworkError> {
        lock(&self.journal).push("subscribe".to_string());
        *lock(&self.subscriber) = Some(events);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

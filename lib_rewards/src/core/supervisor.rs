//! # Connection Supervisor
//!
//! Owns the lifecycle of the link to the messaging daemon.
//!
//! ## State machine
//! `Disconnected -> Connecting -> Connected`, and `Recovering` while a
//! restart escalation is in flight. Any failure classified as
//! connection-broken sends the link back through `Recovering`.
//!
//! ## Reconnect policy
//! One cycle is `attempts_per_cycle` handshakes separated by `attempt_delay`.
//! When a whole cycle fails the daemon is restarted through the escalation
//! hook, the supervisor waits `escalation_wait`, and starts the next cycle.
//! Cycles repeat until a handshake succeeds or the cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::configs::ReconnectConfig;
use crate::error::BridgeError;
use crate::network::{MessagingClient, NetworkError, NetworkEvent};
use crate::remediation::{AdminNotifier, RestartEscalation, ServiceUnit};

/// Link states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A restart was requested and we are waiting for the daemon to come back.
    Recovering,
}

/// Retry timings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts_per_cycle: u32,
    pub attempt_delay: Duration,
    pub escalation_wait: Duration,
    pub handshake_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts_per_cycle: 5,
            attempt_delay: Duration::from_secs(12),
            escalation_wait: Duration::from_secs(40),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReconnectConfig, handshake_timeout_secs: u64) -> Self {
        Self {
            attempts_per_cycle: config.attempts_per_cycle.max(1),
            attempt_delay: Duration::from_secs(config.attempt_delay_secs),
            escalation_wait: Duration::from_secs(config.escalation_wait_secs),
            handshake_timeout: Duration::from_secs(handshake_timeout_secs),
        }
    }
}

/// What a health check found.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthReport {
    Healthy { contacts: usize },
    /// Something was wrong and a remediation ran.
    Remediated { reason: String },
}

pub struct ConnectionSupervisor {
    client: Arc<dyn MessagingClient>,
    escalation: Arc<dyn RestartEscalation>,
    notifier: Arc<dyn AdminNotifier>,
    events: mpsc::UnboundedSender<NetworkEvent>,
    policy: RetryPolicy,
    strict_health: bool,
    state: RwLock<ConnectionState>,
    /// Only one reconnect cycle runs at a time.
    connect_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        escalation: Arc<dyn RestartEscalation>,
        notifier: Arc<dyn AdminNotifier>,
        events: mpsc::UnboundedSender<NetworkEvent>,
        policy: RetryPolicy,
        strict_health: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            escalation,
            notifier,
            events,
            policy,
            strict_health,
            state: RwLock::new(ConnectionState::Disconnected),
            connect_lock: Mutex::new(()),
            cancel,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != next {
            tracing::info!(from = ?*state, to = ?next, "connection state change");
            *state = next;
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sleeps unless cancelled first.
    async fn pause(&self, duration: Duration) -> Result<(), BridgeError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(BridgeError::Shutdown),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Liveness probe plus event subscription, bounded by the handshake timeout.
    async fn handshake(&self) -> Result<(), NetworkError> {
        let attempt = async {
            if !self.client.check_live_connection().await {
                return Err(NetworkError::ConnectionBroken("daemon did not answer the liveness probe".into()));
            }
            self.client.subscribe(self.events.clone()).await
        };
        match tokio::time::timeout(self.policy.handshake_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::HandshakeTimeout(self.policy.handshake_timeout)),
        }
    }

    /// One cycle of handshakes. `Ok(true)` when connected.
    async fn connect_cycle(&self) -> Result<bool, BridgeError> {
        for attempt in 1..=self.policy.attempts_per_cycle {
            if self.cancel.is_cancelled() {
                return Err(BridgeError::Shutdown);
            }
            self.set_state(ConnectionState::Connecting).await;
            match self.handshake().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected).await;
                    tracing::info!(attempt, "connected to messaging daemon");
                    return Ok(true);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected).await;
                    tracing::warn!(
                        attempt,
                        of = self.policy.attempts_per_cycle,
                        error = %e,
                        "handshake failed"
                    );
                    self.pause(self.policy.attempt_delay).await?;
                }
            }
        }
        Ok(false)
    }

    /// Restarts the daemon and waits for it to come back.
    async fn escalate(&self, reason: &str) -> Result<(), BridgeError> {
        self.set_state(ConnectionState::Recovering).await;
        tracing::error!(reason, "escalating: restarting messaging daemon");
        if let Err(e) = self.escalation.restart(ServiceUnit::Network).await {
            tracing::error!(error = %e, "restart escalation failed");
            self.notifier.notify("restart failed", &e.to_string()).await;
        }
        self.pause(self.policy.escalation_wait).await
    }

    /// Connects, retrying forever with escalation between cycles. Only
    /// returns an error when cancelled.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let _cycle = self.connect_lock.lock().await;
        // Another caller may have reconnected while we waited for the lock.
        if self.state().await == ConnectionState::Connected {
            return Ok(());
        }
        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            if self.connect_cycle().await? {
                return Ok(());
            }
            tracing::error!(cycle, "reconnect cycle exhausted");
            self.escalate("reconnect cycle exhausted").await?;
        }
    }

    /// Single cycle without escalation. Used at startup, where an
    /// unreachable daemon is fatal.
    pub async fn connect_bounded(&self) -> Result<(), BridgeError> {
        let _cycle = self.connect_lock.lock().await;
        if self.connect_cycle().await? {
            Ok(())
        } else {
            Err(NetworkError::ConnectionBroken(format!(
                "daemon unreachable after {} attempts",
                self.policy.attempts_per_cycle
            ))
            .into())
        }
    }

    /// Routes a failure: broken links are restarted and reconnected, other
    /// errors are reported to the administrator.
    pub async fn on_failure(&self, err: &BridgeError) {
        if err.is_connection_broken() {
            tracing::error!(error = %err, "connection broken");
            self.set_state(ConnectionState::Disconnected).await;
            if self.escalate(&err.to_string()).await.is_err() {
                return;
            }
            if let Err(e) = self.connect().await {
                tracing::info!(error = %e, "reconnect abandoned");
            }
        } else {
            tracing::error!(error = %err, "upstream error");
            self.notifier.notify("upstream error", &err.to_string()).await;
        }
    }

    /// Periodic check: reconnect when dead, then make sure reads return data.
    pub async fn health_check(&self) -> Result<HealthReport, BridgeError> {
        if !self.client.check_live_connection().await {
            tracing::warn!("health check: connection is dead, reconnecting");
            self.set_state(ConnectionState::Disconnected).await;
            self.connect().await?;
        }

        match self.client.get_contacts("").await {
            Ok(contacts) if self.strict_health && contacts.is_empty() => {
                let reason = "contact list is empty".to_string();
                tracing::error!("health check: {reason}");
                self.escalate(&reason).await?;
                self.connect().await?;
                Ok(HealthReport::Remediated { reason })
            }
            Ok(contacts) => {
                tracing::debug!(contacts = contacts.len(), "health check passed");
                Ok(HealthReport::Healthy {
                    contacts: contacts.len(),
                })
            }
            Err(e) => {
                let reason = format!("contact read failed: {e}");
                tracing::error!("health check: {reason}");
                self.escalate(&reason).await?;
                self.connect().await?;
                Ok(HealthReport::Remediated { reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockNetwork, RecordingEscalation, RecordingNotifier};

    struct Harness {
        network: Arc<MockNetwork>,
        escalation: Arc<RecordingEscalation>,
        notifier: Arc<RecordingNotifier>,
        supervisor: Arc<ConnectionSupervisor>,
        _events: mpsc::UnboundedReceiver<NetworkEvent>,
    }

    fn harness(strict: bool) -> Harness {
        let network = Arc::new(MockNetwork::new());
        let escalation = Arc::new(RecordingEscalation::with_log(network.journal()));
        let notifier = Arc::new(RecordingNotifier::default());
        let (tx, events) = mpsc::unbounded_channel();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            network.clone(),
            escalation.clone(),
            notifier.clone(),
            tx,
            RetryPolicy::default(),
            strict,
            CancellationToken::new(),
        ));
        Harness {
            network,
            escalation,
            notifier,
            supervisor,
            _events: events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_first_try() {
        let h = harness(false);
        h.supervisor.connect().await.unwrap();
        assert_eq!(h.supervisor.state().await, ConnectionState::Connected);
        assert_eq!(h.network.subscriptions(), 1);
        assert_eq!(h.escalation.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_once_after_five_failures() {
        let h = harness(false);
        h.network.fail_next_handshakes(6);
        h.supervisor.connect().await.unwrap();

        let journal = h.network.journal_entries();
        let expected: Vec<&str> = [
            "probe", "probe", "probe", "probe", "probe", "restart:Network", "probe", "probe", "subscribe",
        ]
        .to_vec();
        assert_eq!(journal, expected);
        assert_eq!(h.escalation.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_timing() {
        let h = harness(false);
        h.network.fail_next_handshakes(5);
        let started = tokio::time::Instant::now();
        h.supervisor.connect().await.unwrap();
        // 5 x 12s between attempts, then 40s after the restart.
        assert_eq!(started.elapsed(), Duration::from_secs(5 * 12 + 40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_bounded_fails_without_escalation() {
        let h = harness(false);
        h.network.fail_next_handshakes(100);
        let err = h.supervisor.connect_bounded().await.unwrap_err();
        assert!(err.is_connection_broken());
        assert_eq!(h.escalation.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_infinite_retry() {
        let h = harness(false);
        h.network.fail_next_handshakes(u32::MAX);
        let token = h.supervisor.cancellation_token();
        let supervisor = h.supervisor.clone();
        let task = tokio::spawn(async move { supervisor.connect().await });
        tokio::time::sleep(Duration::from_secs(500)).await;
        token.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(BridgeError::Shutdown)));
        assert!(h.escalation.count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_counts_as_failure() {
        let h = harness(false);
        h.network.hang_next_probes(1);
        h.supervisor.connect().await.unwrap();
        assert_eq!(h.network.journal_entries().iter().filter(|e| **e == "probe").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_failure_broken_restarts_and_reconnects() {
        let h = harness(false);
        let err: BridgeError = NetworkError::ConnectionBroken("reset".into()).into();
        h.supervisor.on_failure(&err).await;
        assert_eq!(h.escalation.count(), 1);
        assert_eq!(h.supervisor.state().await, ConnectionState::Connected);
        assert!(h.notifier.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_failure_application_only_notifies() {
        let h = harness(false);
        let err: BridgeError = NetworkError::Application("bad params".into()).into();
        h.supervisor.on_failure(&err).await;
        assert_eq!(h.escalation.count(), 0);
        assert_eq!(h.notifier.messages().len(), 1);
        assert_eq!(h.network.subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_reconnects_dead_link() {
        let h = harness(false);
        h.network.set_contacts(vec![crate::testing::contact("AA", "bob", 4096)]);
        h.network.fail_next_handshakes(1);
        let report = h.supervisor.health_check().await.unwrap();
        assert_eq!(report, HealthReport::Healthy { contacts: 1 });
        assert_eq!(h.network.subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_resubscribes_dropped_stream() {
        let h = harness(false);
        h.supervisor.connect().await.unwrap();
        h.network.drop_stream();
        assert!(!h.network.emit(NetworkEvent::Unrecognized { kind: "x".into() }));

        let report = h.supervisor.health_check().await.unwrap();
        assert_eq!(report, HealthReport::Healthy { contacts: 0 });
        assert_eq!(h.network.subscriptions(), 2);
        assert_eq!(h.escalation.count(), 0);
        assert!(h.network.emit(NetworkEvent::Unrecognized { kind: "x".into() }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_connect_skips_when_already_connected() {
        let h = harness(false);
        h.supervisor.connect().await.unwrap();
        h.supervisor.connect().await.unwrap();
        assert_eq!(h.network.subscriptions(), 1);
        assert_eq!(h.network.journal_entries(), vec!["probe", "subscribe"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_health_check_escalates_on_empty() {
        let h = harness(true);
        let report = h.supervisor.health_check().await.unwrap();
        assert!(matches!(report, HealthReport::Remediated { .. }));
        assert_eq!(h.escalation.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lenient_health_check_accepts_empty() {
        let h = harness(false);
        let report = h.supervisor.health_check().await.unwrap();
        assert_eq!(report, HealthReport::Healthy { contacts: 0 });
        assert_eq!(h.escalation.count(), 0);
    }
}

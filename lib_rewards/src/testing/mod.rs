//! # Test Collaborators
//!
//! In-memory implementations of every outside-world trait, used by the unit
//! tests and (through the `testing` feature) by `project_tests`.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::network::{ChannelContact, ContactRecord};
use crate::remediation::{AdminNotifier, RemediationError, RestartEscalation, ServiceUnit};
use crate::utils::Clock;

mod network;
mod store;

pub use network::{Journal, MockNetwork};
pub use store::MemoryLedgerStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

pub fn contact(identity: &str, display_name: &str, status_code: i64) -> ContactRecord {
    ContactRecord {
        identity: identity.to_string(),
        display_name: display_name.to_string(),
        status_code,
    }
}

pub fn channel_member(identity: &str, display_name: &str) -> ChannelContact {
    ChannelContact {
        identity: identity.to_string(),
        display_name: display_name.to_string(),
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Records restart requests instead of running them.
#[derive(Default)]
pub struct RecordingEscalation {
    units: Mutex<Vec<ServiceUnit>>,
    journal: Option<Journal>,
}

impl RecordingEscalation {
    /// Also appends `restart:<unit>` to a [`MockNetwork`] journal.
    pub fn with_log(journal: Journal) -> Self {
        Self {
            units: Mutex::new(Vec::new()),
            journal: Some(journal),
        }
    }

    pub fn count(&self) -> usize {
        lock(&self.units).len()
    }

    pub fn units(&self) -> Vec<ServiceUnit> {
        lock(&self.units).clone()
    }
}

#[async_trait]
impl RestartEscalation for RecordingEscalation {
    async fn restart(&self, unit: ServiceUnit) -> Result<(), RemediationError> {
        lock(&self.units).push(unit);
        if let Some(journal) = &self.journal {
            lock(journal).push(format!("restart:{unit:?}"));
        }
        Ok(())
    }
}

/// Collects `(subject, message)` pairs.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        lock(&self.messages).clone()
    }
}

#[async_trait]
impl AdminNotifier for RecordingNotifier {
    async fn notify(&self, subject: &str, message: &str) {
        lock(&self.messages).push((subject.to_string(), message.to_string()));
    }
}

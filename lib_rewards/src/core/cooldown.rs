//! # Voucher Cooldown
//!
//! Limits voucher redemption attempts per identity. The first attempt is
//! always allowed and opens a window; attempts inside the window are denied
//! without extending it; the first attempt after the window is allowed and
//! opens a new one. In-memory only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::utils::Clock;

pub struct CooldownGate {
    window: Duration,
    clock: Arc<dyn Clock>,
    last_attempt: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownGate {
    pub fn new(window: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
            clock,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// Records the attempt when it is allowed.
    pub fn can_activate(&self, identity: &str) -> bool {
        let now = self.clock.now();
        let mut attempts = self.last_attempt.lock().unwrap_or_else(|p| p.into_inner());
        match attempts.get(identity) {
            Some(started) if now - *started <= self.window => {
                tracing::debug!(identity, "voucher attempt inside cooldown window");
                false
            }
            _ => {
                attempts.insert(identity.to_string(), now);
                true
            }
        }
    }
}

//! # Dispatch Gate
//!
//! Every outbound direct message goes through here. A single GCRA limiter
//! caps the send rate for the whole process; callers suspend until a slot is
//! free. In exclusive mode a process-wide lock additionally keeps sends from
//! interleaving. The gate never retries: upstream errors go back to the
//! caller for classification.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Mutex;

use crate::configs::DispatchConfig;
use crate::network::{MessagingClient, NetworkError};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Fixed at construction for the lifetime of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Lock, rate-limit, send, unlock.
    Exclusive,
    /// Rate-limit, send.
    Concurrent,
}

pub struct DispatchGate {
    client: Arc<dyn MessagingClient>,
    limiter: DirectLimiter,
    mode: DispatchMode,
    lock: Mutex<()>,
}

/// `sends` per `window`, with up to `sends` available in a burst.
fn quota(sends: u32, window: Duration) -> Quota {
    let sends = NonZeroU32::new(sends).unwrap_or(NonZeroU32::MIN);
    let per_send = window / sends.get();
    Quota::with_period(per_send)
        .unwrap_or_else(|| Quota::per_second(sends))
        .allow_burst(sends)
}

impl DispatchGate {
    pub fn new(client: Arc<dyn MessagingClient>, mode: DispatchMode, sends: u32, window: Duration) -> Self {
        Self {
            client,
            limiter: RateLimiter::direct(quota(sends, window)),
            mode,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(client: Arc<dyn MessagingClient>, config: &DispatchConfig) -> Self {
        let mode = if config.exclusive {
            DispatchMode::Exclusive
        } else {
            DispatchMode::Concurrent
        };
        Self::new(
            client,
            mode,
            config.sends_per_window,
            Duration::from_millis(config.window_ms),
        )
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Sends exactly one message, waiting for a rate slot first.
    pub async fn send(&self, identity: &str, text: &str) -> Result<(), NetworkError> {
        match self.mode {
            DispatchMode::Exclusive => {
                let _guard = self.lock.lock().await;
                self.limiter.until_ready().await;
                self.client.send_direct_message(identity, text).await
            }
            DispatchMode::Concurrent => {
                self.limiter.until_ready().await;
                self.client.send_direct_message(identity, text).await
            }
        }
    }

    /// Sends several messages in order, stopping at the first error.
    pub async fn send_all<S: AsRef<str>>(&self, identity: &str, texts: &[S]) -> Result<(), NetworkError> {
        for text in texts {
            self.send(identity, text.as_ref()).await?;
        }
        Ok(())
    }
}

//! # lib_rewards
//!
//! Presence & Accrual Engine for a messenger-driven loyalty program.
//!
//! The crate is split the same way the runtime is wired:
//! - [`core`]: presence cache, connection supervisor, accrual scheduler,
//!   dispatch gate, voucher ledger and the event router that feeds them.
//! - [`network`]: the messaging client contract plus the HTTP/WebSocket adapter.
//! - [`connections`]: the ledger store contract plus the Postgres adapter.
//! - [`remediation`]: service restarts and admin notifications.
//! - [`configs`] and [`loggers`]: process configuration and `tracing` setup.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Layered configuration (defaults, JSON file, CLI/env).
pub mod configs;
/// Ledger store contract and its backends.
pub mod connections;
/// The Presence & Accrual Engine.
pub mod core;
/// Crate-wide error types.
pub mod error;
/// `tracing` subscriber setup.
pub mod loggers;
/// Messaging network contract, events and the concrete client.
pub mod network;
/// Restart escalation and administrative notifications.
pub mod remediation;
/// Small helpers shared across modules.
pub mod utils;

/// In-memory collaborators for tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::BridgeError;

//! # Presence & Accrual Engine
//!
//! The components that keep presence, the connection and the points ledger
//! consistent while the upstream messenger comes and goes.
//!
//! ## Core Components:
//!
//! - **`presence`**: the in-memory set of online identities, updated from
//!   events and replaced wholesale from contact snapshots.
//!
//! - **`supervisor`**: owns the upstream link. Bounded reconnect cycles,
//!   restart escalation between cycles, periodic health checks.
//!
//! - **`accrual`**: the periodic tick that credits users who are online and
//!   present in the monitored channel. Falls back to cached snapshots and
//!   never runs twice at once.
//!
//! - **`dispatcher`**: the only way out. Rate-limits every direct message,
//!   optionally behind one process-wide lock.
//!
//! - **`vouchers`** and **`cooldown`**: single-use point codes and the
//!   per-user limit on redemption attempts.
//!
//! The remaining modules (`ledger`, `router`, `admin`, `context`) connect
//! these to the store, the event stream and the operators.

/// Periodic crediting of online channel members.
pub mod accrual;
/// Moderator and HTTP admin commands.
pub mod admin;
/// Per-tick award policies.
pub mod award;
/// Construction of the shared service context.
pub mod context;
/// Per-identity limit on voucher redemption attempts.
pub mod cooldown;
/// Rate-limited outbound message gate.
pub mod dispatcher;
/// Account operations over the ledger store.
pub mod ledger;
/// The online set.
pub mod presence;
/// Upstream event handling.
pub mod router;
/// Upstream connection lifecycle.
pub mod supervisor;
/// Voucher issuance and redemption.
pub mod vouchers;

pub use accrual::{AccrualScheduler, ChannelMembership, TickOutcome};
pub use admin::{AdminCommand, AdminConsole, ContactsReport};
pub use award::{AwardPolicy, Tier};
pub use context::{Collaborators, ServiceContext};
pub use cooldown::CooldownGate;
pub use dispatcher::{DispatchGate, DispatchMode};
pub use ledger::{DebitReceipt, Ledger};
pub use presence::PresenceTracker;
pub use router::EventRouter;
pub use supervisor::{ConnectionState, ConnectionSupervisor, HealthReport, RetryPolicy};
pub use vouchers::VoucherLedger;

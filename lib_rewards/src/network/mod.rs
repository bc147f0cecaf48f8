//! # Network Module
//!
//! Everything the engine knows about the messaging network lives behind the
//! [`MessagingClient`] trait. The concrete adapter speaks the daemon's JSON-RPC
//! API over HTTP and receives notifications over a WebSocket.

/// The messaging client contract and its record types.
pub mod client;
/// Typed upstream notifications.
pub mod events;
/// JSON-RPC over HTTP adapter.
pub mod rpc_http;
/// WebSocket notification reader.
pub mod ws_events;

pub use client::{ChannelContact, ContactRecord, MessagingClient, NetworkError, PresenceStatus};
pub use events::{IncomingMessage, NetworkEvent};
pub use rpc_http::UtopiaClient;

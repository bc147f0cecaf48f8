//! # Utils Module

/// Injectable wall clock.
pub mod clock;
/// Text helpers for nicknames, amounts and reply chunking.
pub mod text;

pub use clock::{Clock, SystemClock};
pub use text::{chunk_lines, format_points, is_identity, sanitize_display_name, IDENTITY_LENGTH};

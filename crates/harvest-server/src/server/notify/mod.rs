//! Real-time notification channel.
//!
//! - [`hub`] - per-organization rooms and best-effort fan-out.

pub mod hub;

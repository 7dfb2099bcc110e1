//! Dispatch engine.
//!
//! - [`selector`] - picks the next batch of nearest un-notified organizations.
//! - [`gate`] - per-donation lock ordering notifications against claims.
//! - [`worker`] - the per-donation `SELECTING → NOTIFYING → WAITING` loop.
//! - [`supervisor`] - spawns, tracks and drains dispatch loops.

pub mod gate;
pub mod selector;
pub mod supervisor;
pub mod worker;

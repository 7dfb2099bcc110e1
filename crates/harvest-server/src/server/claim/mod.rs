//! Claim arbitration.
//!
//! - [`arbiter`] - compare-and-set claims plus the outcome fan-out.

pub mod arbiter;

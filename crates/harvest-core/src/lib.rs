#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can reach the ULID machinery via
// `harvest_core::ferroid`
pub use ferroid;

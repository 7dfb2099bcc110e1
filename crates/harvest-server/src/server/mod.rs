//! The donation dispatch engine and its network surface.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`store`] - donation store and organization directory seams.
//! - [`dispatch`] - proximity selection and the per-donation dispatch loop.
//! - [`claim`] - compare-and-set claim arbitration.
//! - [`notify`] - per-organization rooms for real-time frames.
//! - [`service`] - shared state, HTTP routes and the WebSocket channel.
//! - [`telemetry`] - logging and optional OpenTelemetry export.

pub mod claim;
pub mod config;
pub mod dispatch;
pub mod notify;
pub mod service;
pub mod store;
pub mod telemetry;

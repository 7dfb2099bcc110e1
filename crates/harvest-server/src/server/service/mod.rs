//! HTTP and WebSocket surface of the dispatch engine.
//!
//! ## Structure
//!
//! - [`config`] - concrete store and engine types the server runs with.
//! - [`handler`] - [`HarvestService`](handler::HarvestService), the shared
//!   application state every route and connection works through.
//! - [`routes`] - the axum router for the JSON API.
//! - [`socket`] - the WebSocket notification channel.

pub mod config;
pub mod handler;
pub mod routes;
pub mod socket;

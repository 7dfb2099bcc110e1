//! Error types for the donation relay.
//!
//! This module defines the central `Error` enum, which captures all
//! recoverable and reportable error cases of the dispatch engine and its
//! HTTP/WebSocket boundary. It implements
//! [`IntoResponse`](axum::response::IntoResponse) so handlers can return it
//! directly with an appropriate status code and a `{"message": ...}` body.
//!
//! A lost compare-and-set (already claimed, already cancelled) is *not* an
//! error: store operations report it as `false`/`None` and callers branch on
//! it.
//!
//! ## Error Cases
//! - `InvalidId`: An identifier from untrusted input failed to parse.
//! - `InvalidRequest`: A request body was incomplete or out of range.
//! - `NotFound`: The referenced record does not exist.
//! - `StoreUnavailable`: The donation store or organization directory could
//!   not be reached.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the donation relay.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Malformed donation or organization identifier.
    #[error("Invalid {kind} id: `{value}`")]
    InvalidId { kind: &'static str, value: String },

    /// The request was incomplete or violated a constraint.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The referenced record does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The backing store could not serve the request.
    #[error("Store unavailable: {context}")]
    StoreUnavailable { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// HTTP status code this error maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidId { .. } | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::StoreUnavailable { .. } | Self::ServiceShutdown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

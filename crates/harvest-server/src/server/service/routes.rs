//! JSON API routes.
//!
//! | method | path                              | handler            |
//! |--------|-----------------------------------|--------------------|
//! | GET    | `/healthz`                        | liveness           |
//! | GET    | `/api/donations`                  | open donations     |
//! | POST   | `/api/donations`                  | post a donation    |
//! | GET    | `/api/donations/claimed`          | claimed donations  |
//! | POST   | `/api/donations/{id}/claim`       | claim              |
//! | POST   | `/api/donations/{id}/cancel`      | operator cancel    |
//! | POST   | `/api/organizations/register`     | register or update |
//! | GET    | `/ws`                             | notification socket|

use crate::server::{
    claim::arbiter::{ClaimOutcome, RejectReason},
    service::{handler::HarvestService, socket},
};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use harvest_core::{
    Error, Result,
    ids::{DonationId, OrganizationId},
    types::{DonationForm, RegistrationForm},
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Builds the full application router, CORS included.
pub fn router(service: HarvestService) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/donations", get(list_open).post(post_donation))
        .route("/api/donations/claimed", get(list_claimed))
        .route("/api/donations/{id}/claim", post(claim))
        .route("/api/donations/{id}/cancel", post(cancel))
        .route("/api/organizations/register", post(register))
        .route("/ws", get(socket::upgrade))
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(service)
}

fn body<T>(payload: core::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::InvalidRequest {
            reason: rejection.body_text(),
        })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_open(State(service): State<HarvestService>) -> Result<Response> {
    Ok(Json(service.list_open().await?).into_response())
}

async fn list_claimed(State(service): State<HarvestService>) -> Result<Response> {
    Ok(Json(service.list_claimed().await?).into_response())
}

async fn post_donation(
    State(service): State<HarvestService>,
    payload: core::result::Result<Json<DonationForm>, JsonRejection>,
) -> Result<Response> {
    let donation = service.post_donation(body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "donation saved", "id": donation.id })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    organization_id: String,
}

async fn claim(
    State(service): State<HarvestService>,
    Path(id): Path<String>,
    payload: core::result::Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Response> {
    let donation_id = id.parse::<DonationId>()?;
    let organization_id = body(payload)?.organization_id.parse::<OrganizationId>()?;

    match service.claim(donation_id, organization_id).await? {
        ClaimOutcome::Accepted(donation) => {
            Ok(Json(json!({ "ok": true, "donation": donation })).into_response())
        }
        ClaimOutcome::Rejected(RejectReason::NotFound) => Err(Error::NotFound {
            kind: DonationId::KIND,
            id: donation_id.to_string(),
        }),
        ClaimOutcome::Rejected(reason) => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "ok": false, "reason": reason.as_str() })),
        )
            .into_response()),
    }
}

async fn cancel(
    State(service): State<HarvestService>,
    Path(id): Path<String>,
) -> Result<Response> {
    service.cancel_donation(id.parse::<DonationId>()?).await?;
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn register(
    State(service): State<HarvestService>,
    payload: core::result::Result<Json<RegistrationForm>, JsonRejection>,
) -> Result<Response> {
    let organization = service.register_organization(body(payload)?).await?;
    Ok(Json(json!({
        "ok": true,
        "organization": { "id": organization.id, "name": organization.name },
    }))
    .into_response())
}

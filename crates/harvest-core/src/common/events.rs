//! # Notification Channel Wire Events
//!
//! Every real-time frame is a JSON object of the form
//! `{"event": "<name>", "data": {...}}`. [`ServerEvent`] covers the frames
//! the server pushes and [`ClientEvent`] the frames organizations send.
//!
//! Identifiers inside [`ClientEvent`] are kept as raw strings so a malformed
//! id can be answered with an explicit failure reply instead of dropping the
//! whole frame.

use crate::{
    ids::{DonationId, OrganizationId},
    types::{ClaimStatus, Donation},
};
use serde::{Deserialize, Serialize};

/// Frames pushed from the server to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    DonationAvailable(DonationAvailable),
    DonationAssigned(DonationAssigned),
    DonationCleared(DonationCleared),
    AcceptResult(AcceptResult),
    SocketRegistered(SocketRegistered),
    Error(EventError),
}

impl ServerEvent {
    /// The `event` name this frame carries on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DonationAvailable(_) => "donation_available",
            Self::DonationAssigned(_) => "donation_assigned",
            Self::DonationCleared(_) => "donation_cleared",
            Self::AcceptResult(_) => "accept_result",
            Self::SocketRegistered(_) => "socket_registered",
            Self::Error(_) => "error",
        }
    }
}

/// A new batch offer for a donation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationAvailable {
    #[serde(rename = "type")]
    pub kind: String,
    pub donation_id: DonationId,
    pub food: String,
    pub donor_name: String,
    pub approx_area: String,
    pub round: u32,
}

impl DonationAvailable {
    /// Builds the offer for `donation` as of `round`.
    #[must_use]
    pub fn new(donation: &Donation, round: u32) -> Self {
        Self {
            kind: "donation_available".to_string(),
            donation_id: donation.id,
            food: donation.food_summary(),
            donor_name: donation.donor_name.clone(),
            approx_area: donation.address.clone(),
            round,
        }
    }
}

/// Sent only to the organization that won the claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationAssigned {
    pub donation_id: DonationId,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub food: String,
    pub donor_name: String,
}

impl From<&Donation> for DonationAssigned {
    fn from(donation: &Donation) -> Self {
        Self {
            donation_id: donation.id,
            address: donation.address.clone(),
            lat: donation.location.lat,
            lng: donation.location.lng,
            food: donation.food_summary(),
            donor_name: donation.donor_name.clone(),
        }
    }
}

/// Tells a previously notified organization the offer is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationCleared {
    pub donation_id: DonationId,
    pub status: ClaimStatus,
}

/// Direct reply to an `accept_donation` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AcceptResult {
    #[must_use]
    pub const fn accepted() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Direct reply to a `register_ngo_socket` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketRegistered {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Reply to a frame that could not be understood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventError {
    pub reason: String,
}

/// Frames sent by an organization's connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    RegisterNgoSocket {
        organization_id: String,
    },
    AcceptDonation {
        organization_id: String,
        donation_id: String,
    },
}

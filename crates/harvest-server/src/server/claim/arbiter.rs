//! Resolves concurrent claims on a donation.
//!
//! Any number of organizations may try to claim the same donation at once.
//! The store's conditional update ("claimed WHERE still open") decides the
//! winner; exactly one caller sees it match. The winner then receives
//! `donation_assigned`, and every *other* organization in the notified-set
//! receives exactly one `donation_cleared`.

use crate::server::{
    dispatch::gate::DonationGate,
    notify::hub::Hub,
    store::DonationStore,
    telemetry::{increment_claims_accepted, increment_claims_rejected, record_claim_duration},
};
use chrono::Utc;
use harvest_core::{
    Error, Result,
    events::{AcceptResult, DonationCleared, ServerEvent},
    ids::{DonationId, OrganizationId},
    types::{ClaimStatus, Donation},
};
use std::sync::Arc;

/// Why a claim did not win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyClaimed,
    Cancelled,
    NotFound,
}

impl RejectReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyClaimed => "already claimed",
            Self::Cancelled => "donation cancelled",
            Self::NotFound => "donation not found",
        }
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller won; carries the donation as stored after the claim.
    Accepted(Donation),
    Rejected(RejectReason),
}

impl ClaimOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

impl From<&ClaimOutcome> for AcceptResult {
    fn from(outcome: &ClaimOutcome) -> Self {
        match outcome {
            ClaimOutcome::Accepted(_) => Self::accepted(),
            ClaimOutcome::Rejected(reason) => Self::rejected(reason.as_str()),
        }
    }
}

/// Sends `donation_cleared` to every notified organization except `except`.
/// Returns the number of frames delivered.
pub fn clear_notified(hub: &Hub, donation: &Donation, except: Option<OrganizationId>) -> usize {
    let cleared = ServerEvent::DonationCleared(DonationCleared {
        donation_id: donation.id,
        status: donation.status,
    });
    hub.broadcast_to_set(
        donation.notified.iter().filter(|org| Some(**org) != except),
        &cleared,
    )
}

pub struct ClaimArbiter<S> {
    store: Arc<S>,
    hub: Arc<Hub>,
    gate: Arc<DonationGate>,
}

impl<S: DonationStore> ClaimArbiter<S> {
    pub const fn new(store: Arc<S>, hub: Arc<Hub>, gate: Arc<DonationGate>) -> Self {
        Self { store, hub, gate }
    }

    /// Attempts to hand `donation_id` to `organization_id`.
    ///
    /// # Errors
    ///
    /// Only store failures are errors. Losing the race is
    /// [`ClaimOutcome::Rejected`].
    #[tracing::instrument(skip_all, fields(donation = %donation_id, organization = %organization_id))]
    pub async fn try_claim(
        &self,
        donation_id: DonationId,
        organization_id: OrganizationId,
    ) -> Result<ClaimOutcome> {
        let start = std::time::Instant::now();
        let guard = self.gate.lock(donation_id).await;

        if !self
            .store
            .try_claim(donation_id, organization_id, Utc::now())
            .await?
        {
            // Not open: nothing gated remains, so the entry can go.
            drop(guard);
            self.gate.forget(&donation_id);
            let reason = match self.store.get(donation_id).await? {
                None => RejectReason::NotFound,
                Some(d) if d.status == ClaimStatus::Cancelled => RejectReason::Cancelled,
                Some(_) => RejectReason::AlreadyClaimed,
            };
            increment_claims_rejected();
            tracing::info!(reason = reason.as_str(), "claim rejected");
            return Ok(ClaimOutcome::Rejected(reason));
        }

        let donation = self
            .store
            .get(donation_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: DonationId::KIND,
                id: donation_id.to_string(),
            })?;

        self.hub.publish(
            &organization_id,
            &ServerEvent::DonationAssigned((&donation).into()),
        );
        let cleared = clear_notified(&self.hub, &donation, Some(organization_id));

        drop(guard);
        self.gate.forget(&donation_id);

        increment_claims_accepted();
        record_claim_duration(start.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(
            notified = donation.notified.len(),
            cleared,
            "claim accepted"
        );

        Ok(ClaimOutcome::Accepted(donation))
    }

    /// Withdraws an open donation and clears every notified organization.
    ///
    /// Returns `false` when the donation is missing or no longer open.
    #[tracing::instrument(skip_all, fields(donation = %donation_id))]
    pub async fn cancel(&self, donation_id: DonationId) -> Result<bool> {
        let guard = self.gate.lock(donation_id).await;
        if !self.store.try_cancel(donation_id, Utc::now()).await? {
            drop(guard);
            self.gate.forget(&donation_id);
            return Ok(false);
        }

        if let Some(donation) = self.store.get(donation_id).await? {
            let cleared = clear_notified(&self.hub, &donation, None);
            tracing::info!(cleared, "donation cancelled");
        }

        drop(guard);
        self.gate.forget(&donation_id);
        Ok(true)
    }
}

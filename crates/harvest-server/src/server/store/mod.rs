//! Durable-state seams of the dispatch engine.
//!
//! The engine never touches a database directly. It talks to two
//! collaborators through the traits defined here:
//!
//! - [`DonationStore`] - donation records with *conditional* updates. Every
//!   mutation of a donation is guarded by "still open"; a non-matching guard
//!   is reported as `false`/`None`, never as an error.
//! - [`OrganizationDirectory`] - geo-indexed organizations answering "active
//!   organizations within R meters, nearest first".
//!
//! [`memory`] provides in-process implementations backed by `parking_lot`
//! locks, which is what the server binary and the tests run against.

pub mod memory;

use chrono::{DateTime, Utc};
use harvest_core::{
    Result,
    geo::GeoPoint,
    ids::{DonationId, OrganizationId},
    types::{ClaimStatus, Donation, Organization},
};

/// An organization returned by a proximity query, with its distance from the
/// query origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Nearby {
    pub organization: Organization,
    pub distance_m: f64,
}

/// Durable record of donations, their claim status and notification history.
pub trait DonationStore: Send + Sync + 'static {
    /// Inserts a new donation.
    fn insert(&self, donation: Donation) -> impl Future<Output = Result<()>> + Send;

    /// Point lookup by id.
    fn get(&self, id: DonationId) -> impl Future<Output = Result<Option<Donation>>> + Send;

    /// All donations currently in `status`, oldest first.
    fn list_by_status(
        &self,
        status: ClaimStatus,
    ) -> impl Future<Output = Result<Vec<Donation>>> + Send;

    /// Adds `organizations` to the notified-set, increments the round and
    /// touches `updated_at`, **only if** the donation is still open.
    ///
    /// Returns the updated donation when the guard matched, `None` when the
    /// donation is gone or no longer open.
    fn record_round(
        &self,
        id: DonationId,
        organizations: &[OrganizationId],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Donation>>> + Send;

    /// Sets status to claimed and `accepted_by` to `organization`, **only if**
    /// the donation is still open. Returns whether this caller won.
    fn try_claim(
        &self,
        id: DonationId,
        organization: OrganizationId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Sets status to cancelled, **only if** the donation is still open.
    fn try_cancel(
        &self,
        id: DonationId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Geo-indexed record of recipient organizations.
pub trait OrganizationDirectory: Send + Sync + 'static {
    /// Inserts or replaces an organization.
    fn upsert(&self, organization: Organization) -> impl Future<Output = Result<()>> + Send;

    /// Point lookup by id.
    fn get(&self, id: OrganizationId)
    -> impl Future<Output = Result<Option<Organization>>> + Send;

    /// Active organizations within `radius_m` of `origin`, ordered by
    /// ascending distance.
    fn near(
        &self,
        origin: GeoPoint,
        radius_m: f64,
    ) -> impl Future<Output = Result<Vec<Nearby>>> + Send;
}

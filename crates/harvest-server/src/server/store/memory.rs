//! In-process store and directory.
//!
//! Each conditional update runs entirely under one write lock, which gives
//! the same compare-and-set semantics as a document store's
//! `update_one({_id, status: open}, ...)`.

use super::{DonationStore, Nearby, OrganizationDirectory};
use chrono::{DateTime, Utc};
use harvest_core::{
    Result,
    geo::GeoPoint,
    ids::{DonationId, OrganizationId},
    types::{ClaimStatus, Donation, Organization},
};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    donations: RwLock<HashMap<DonationId, Donation>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.donations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.donations.read().is_empty()
    }

    /// Applies `update` to an open donation under the write lock.
    fn update_open<T>(&self, id: DonationId, update: impl FnOnce(&mut Donation) -> T) -> Option<T> {
        let mut donations = self.donations.write();
        match donations.get_mut(&id) {
            Some(donation) if donation.is_open() => Some(update(donation)),
            _ => None,
        }
    }
}

impl DonationStore for MemoryStore {
    async fn insert(&self, donation: Donation) -> Result<()> {
        self.donations.write().insert(donation.id, donation);
        Ok(())
    }

    async fn get(&self, id: DonationId) -> Result<Option<Donation>> {
        Ok(self.donations.read().get(&id).cloned())
    }

    async fn list_by_status(&self, status: ClaimStatus) -> Result<Vec<Donation>> {
        let mut matching: Vec<Donation> = self
            .donations
            .read()
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|d| (d.created_at, d.id));
        Ok(matching)
    }

    async fn record_round(
        &self,
        id: DonationId,
        organizations: &[OrganizationId],
        now: DateTime<Utc>,
    ) -> Result<Option<Donation>> {
        Ok(self.update_open(id, |donation| {
            for org in organizations {
                // $addToSet semantics
                if !donation.notified.contains(org) {
                    donation.notified.push(*org);
                }
            }
            donation.round += 1;
            donation.updated_at = now;
            donation.clone()
        }))
    }

    async fn try_claim(
        &self,
        id: DonationId,
        organization: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .update_open(id, |donation| {
                donation.status = ClaimStatus::Claimed;
                donation.accepted_by = Some(organization);
                donation.updated_at = now;
            })
            .is_some())
    }

    async fn try_cancel(&self, id: DonationId, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .update_open(id, |donation| {
                donation.status = ClaimStatus::Cancelled;
                donation.updated_at = now;
            })
            .is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    organizations: RwLock<HashMap<OrganizationId, Organization>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.organizations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.organizations.read().is_empty()
    }
}

impl OrganizationDirectory for MemoryDirectory {
    async fn upsert(&self, organization: Organization) -> Result<()> {
        self.organizations
            .write()
            .insert(organization.id, organization);
        Ok(())
    }

    async fn get(&self, id: OrganizationId) -> Result<Option<Organization>> {
        Ok(self.organizations.read().get(&id).cloned())
    }

    async fn near(&self, origin: GeoPoint, radius_m: f64) -> Result<Vec<Nearby>> {
        let mut found: Vec<Nearby> = self
            .organizations
            .read()
            .values()
            .filter(|org| org.active)
            .filter_map(|org| {
                let distance_m = origin.distance_m(&org.location);
                (distance_m <= radius_m).then(|| Nearby {
                    organization: org.clone(),
                    distance_m,
                })
            })
            .collect();

        // Ties broken by id so equal distances come back in a stable order.
        found.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.organization.id.cmp(&b.organization.id))
        });
        Ok(found)
    }
}
